//! The compilation context: one arena'd home for everything a single TPL
//! compilation allocates: interned strings, AST nodes, interned types, the
//! expression-type side table, and the diagnostic sink. Dropping the context
//! drops the whole graph at once.

use std::collections::HashMap;

use super::builtins::Builtin;
use super::identifier::{StringInterner, Symbol};
use super::types::{TypeId, TypeInterner};
use super::{Decl, DeclId, Expr, ExprId, Stmt, StmtId};
use crate::sema::ErrorReporter;
use crate::util::Arena;

/// Owns all state for one compilation.
#[derive(Debug)]
pub struct AstContext {
    pub strings: StringInterner,
    pub types: TypeInterner,
    pub decls: Arena<Decl>,
    pub stmts: Arena<Stmt>,
    pub exprs: Arena<Expr>,
    pub reporter: ErrorReporter,
    /// Resolved expression types, filled in by the semantic analyzer.
    expr_types: HashMap<ExprId, TypeId>,
    /// Which builtin each `@name(...)` call resolved to.
    builtin_calls: HashMap<ExprId, Builtin>,
}

impl AstContext {
    pub fn new() -> Self {
        AstContext {
            strings: StringInterner::new(),
            types: TypeInterner::new(),
            decls: Arena::new(),
            stmts: Arena::new(),
            exprs: Arena::new(),
            reporter: ErrorReporter::new(),
            expr_types: HashMap::new(),
            builtin_calls: HashMap::new(),
        }
    }

    pub fn intern(&mut self, name: &str) -> Symbol {
        self.strings.intern(name)
    }

    pub fn resolve(&self, sym: Symbol) -> &str {
        self.strings.resolve(sym)
    }

    pub fn decl(&self, id: DeclId) -> &Decl {
        &self.decls[id]
    }

    pub fn stmt(&self, id: StmtId) -> &Stmt {
        &self.stmts[id]
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id]
    }

    pub fn expr_mut(&mut self, id: ExprId) -> &mut Expr {
        &mut self.exprs[id]
    }

    /// Record the resolved type of an expression.
    pub fn set_expr_type(&mut self, id: ExprId, ty: TypeId) {
        self.expr_types.insert(id, ty);
    }

    /// The resolved type of an expression, if sema has run over it.
    pub fn expr_type(&self, id: ExprId) -> Option<TypeId> {
        self.expr_types.get(&id).copied()
    }

    /// Record which builtin a call expression resolved to.
    pub fn set_builtin_call(&mut self, id: ExprId, builtin: Builtin) {
        self.builtin_calls.insert(id, builtin);
    }

    /// The builtin a call expression resolved to, if any.
    pub fn builtin_call(&self, id: ExprId) -> Option<Builtin> {
        self.builtin_calls.get(&id).copied()
    }
}

impl Default for AstContext {
    fn default() -> Self {
        Self::new()
    }
}
