//! Semantic analysis for TPL.
//!
//! The analyzer walks the AST, resolves every type representation against the
//! context's type interner, binds identifiers through a scope stack, attaches
//! a type to every expression, and synthesizes implicit casts: integer
//! literals are widened or narrowed against their non-literal partner, SQL
//! booleans at `if`/`for` conditions collapse to native bools, and primitives
//! flowing into SQL-typed positions get wrapped. Errors accumulate in the
//! context's reporter; analysis keeps going so one compile shows several
//! diagnostics, and code generation is skipped when any were produced.

pub mod error_reporter;

pub use error_reporter::{Diagnostic, ErrorMessage, ErrorReporter};

use std::collections::HashMap;

use crate::ast::{
    AstContext, BinaryOp, Builtin, BuiltinKind, CallKind, CastKind, DeclId, DeclKind, Expr,
    ExprId, ExprKind, Field, File, LitValue, SourcePos, StmtId, StmtKind, Symbol, TypeId,
    TypeKind, UnaryOp,
};

/// Run semantic analysis over `file`. Errors land in the context's reporter.
pub fn check(file: &File, ctx: &mut AstContext) {
    let mut sema = Sema::new(ctx);
    sema.run(file);
}

struct Sema<'ctx> {
    ctx: &'ctx mut AstContext,
    /// Lexical scopes mapping variable names to their types.
    scopes: Vec<HashMap<Symbol, TypeId>>,
    /// Declared struct names.
    structs: HashMap<Symbol, TypeId>,
    /// Declared function names and their function types.
    functions: HashMap<Symbol, TypeId>,
    /// Return type of the function being checked.
    current_ret: Option<TypeId>,
    /// Builtin type names, resolved once.
    builtin_names: HashMap<String, BuiltinKind>,
}

impl<'ctx> Sema<'ctx> {
    fn new(ctx: &'ctx mut AstContext) -> Self {
        let builtin_names = crate::ast::types::ALL_BUILTINS
            .iter()
            .map(|&kind| (kind.tpl_name().to_string(), kind))
            .collect();
        Sema {
            ctx,
            scopes: Vec::new(),
            structs: HashMap::new(),
            functions: HashMap::new(),
            current_ret: None,
            builtin_names,
        }
    }

    fn run(&mut self, file: &File) {
        // First pass: bring all struct types and function signatures into
        // scope so bodies can reference declarations in any order.
        for &decl_id in &file.declarations {
            self.declare(decl_id);
        }
        // Second pass: check function bodies.
        for &decl_id in &file.declarations {
            if let DeclKind::Function { func, .. } = self.ctx.decl(decl_id).kind {
                self.check_function(func);
            }
        }
    }

    fn report(&mut self, pos: SourcePos, message: ErrorMessage) {
        self.ctx.reporter.report(pos, message);
    }

    fn type_name(&self, ty: TypeId) -> String {
        self.ctx.types.display(ty, &self.ctx.strings)
    }

    // ---------------------------------------------------------------
    // Declarations
    // ---------------------------------------------------------------

    fn declare(&mut self, decl_id: DeclId) {
        let (pos, kind_info) = {
            let decl = self.ctx.decl(decl_id);
            (
                decl.pos,
                match decl.kind {
                    DeclKind::Struct { name, type_repr } => Some((true, name, type_repr)),
                    DeclKind::Function { name, func } => Some((false, name, func)),
                    DeclKind::Variable { .. } => None,
                },
            )
        };
        let Some((is_struct, name, node)) = kind_info else {
            return;
        };
        if is_struct {
            if let Some(ty) = self.resolve_type_repr(node) {
                self.structs.insert(name, ty);
            }
        } else {
            let type_repr = match self.ctx.expr(node).kind {
                ExprKind::FunctionLit { type_repr, .. } => type_repr,
                _ => return,
            };
            if let Some(fn_ty) = self.resolve_type_repr(type_repr) {
                if self.functions.insert(name, fn_ty).is_some() {
                    let text = self.ctx.resolve(name).to_string();
                    self.report(pos, ErrorMessage::VariableRedeclared(text));
                }
            }
        }
    }

    fn check_function(&mut self, func: ExprId) {
        let (type_repr, body) = match self.ctx.expr(func).kind {
            ExprKind::FunctionLit { type_repr, body } => (type_repr, body),
            _ => return,
        };
        let Some(fn_ty) = self.resolve_type_repr(type_repr) else {
            return;
        };
        self.ctx.set_expr_type(func, fn_ty);

        let (params, ret) = match &self.ctx.types.get(fn_ty).kind {
            TypeKind::Function { params, ret } => (params.clone(), *ret),
            _ => return,
        };

        self.scopes.push(HashMap::new());
        for param in &params {
            self.define(self.ctx.expr(type_repr).pos, param.name, param.ty);
        }
        let saved_ret = self.current_ret.replace(ret);
        self.check_stmt(body);
        self.current_ret = saved_ret;
        self.scopes.pop();
    }

    fn define(&mut self, pos: SourcePos, name: Symbol, ty: TypeId) {
        let Some(scope) = self.scopes.last_mut() else {
            return;
        };
        if scope.insert(name, ty).is_some() {
            let text = self.ctx.resolve(name).to_string();
            self.report(pos, ErrorMessage::VariableRedeclared(text));
        }
    }

    fn lookup(&self, name: Symbol) -> Option<TypeId> {
        for scope in self.scopes.iter().rev() {
            if let Some(&ty) = scope.get(&name) {
                return Some(ty);
            }
        }
        None
    }

    // ---------------------------------------------------------------
    // Type representations
    // ---------------------------------------------------------------

    /// Resolve a parsed type representation to an interned type.
    fn resolve_type_repr(&mut self, repr: ExprId) -> Option<TypeId> {
        let pos = self.ctx.expr(repr).pos;
        let resolved = match &self.ctx.expr(repr).kind {
            ExprKind::Identifier { name } => {
                let name = *name;
                self.resolve_named_type(pos, name)
            }
            ExprKind::PointerType { base } => {
                let base = *base;
                let pointee = self.resolve_type_repr(base)?;
                Some(self.ctx.types.pointer_to(pointee))
            }
            ExprKind::ArrayType { len, elem } => {
                let (len, elem) = (*len, *elem);
                let length = match len {
                    None => 0,
                    Some(len_expr) => match self.ctx.expr(len_expr).kind {
                        ExprKind::Literal(LitValue::Int(n)) if n >= 0 => n as u64,
                        ExprKind::Literal(LitValue::Int(_)) => {
                            self.report(pos, ErrorMessage::NegativeArrayLength);
                            return None;
                        }
                        _ => {
                            self.report(pos, ErrorMessage::NonIntegerArrayLength);
                            return None;
                        }
                    },
                };
                let elem_ty = self.resolve_type_repr(elem)?;
                Some(self.ctx.types.array_of(length, elem_ty))
            }
            ExprKind::StructType { fields } => {
                let fields = fields.clone();
                let mut seen = Vec::new();
                let mut resolved_fields = Vec::with_capacity(fields.len());
                for field in &fields {
                    if seen.contains(&field.name) {
                        let text = self.ctx.resolve(field.name).to_string();
                        self.report(field.pos, ErrorMessage::DuplicateStructFieldName(text));
                    }
                    seen.push(field.name);
                    let ty = self.resolve_type_repr(field.type_repr)?;
                    resolved_fields.push(Field {
                        name: field.name,
                        ty,
                    });
                }
                Some(self.ctx.types.struct_type(resolved_fields))
            }
            ExprKind::FunctionType { params, ret } => {
                let (params, ret) = (params.clone(), *ret);
                let mut seen = Vec::new();
                let mut resolved_params = Vec::with_capacity(params.len());
                for param in &params {
                    if seen.contains(&param.name) {
                        let text = self.ctx.resolve(param.name).to_string();
                        self.report(param.pos, ErrorMessage::DuplicateArgName(text));
                    }
                    seen.push(param.name);
                    let ty = self.resolve_type_repr(param.type_repr)?;
                    resolved_params.push(Field {
                        name: param.name,
                        ty,
                    });
                }
                let ret_ty = self.resolve_type_repr(ret)?;
                Some(self.ctx.types.function_type(resolved_params, ret_ty))
            }
            _ => {
                self.report(pos, ErrorMessage::ExpectingType);
                None
            }
        };
        if let Some(ty) = resolved {
            self.ctx.set_expr_type(repr, ty);
        }
        resolved
    }

    fn resolve_named_type(&mut self, pos: SourcePos, name: Symbol) -> Option<TypeId> {
        let text = self.ctx.resolve(name).to_string();
        if let Some(&kind) = self.builtin_names.get(&text) {
            return Some(self.ctx.types.builtin(kind));
        }
        if let Some(&ty) = self.structs.get(&name) {
            return Some(ty);
        }
        self.report(pos, ErrorMessage::UndefinedType(text));
        None
    }

    /// Interpret an *expression* as a type, for builtins like `@ptrCast`
    /// whose first argument is written as a type (`*Row`).
    fn expr_as_type(&mut self, expr: ExprId) -> Option<TypeId> {
        let pos = self.ctx.expr(expr).pos;
        match &self.ctx.expr(expr).kind {
            ExprKind::Identifier { name } => {
                let name = *name;
                self.resolve_named_type(pos, name)
            }
            ExprKind::Unary {
                op: UnaryOp::Deref,
                operand,
            } => {
                let operand = *operand;
                let pointee = self.expr_as_type(operand)?;
                Some(self.ctx.types.pointer_to(pointee))
            }
            _ => {
                self.report(pos, ErrorMessage::ExpectingType);
                None
            }
        }
    }

    // ---------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------

    fn check_stmt(&mut self, stmt_id: StmtId) {
        let pos = self.ctx.stmt(stmt_id).pos;
        // Clone out the shape; ids are cheap and the arena may grow under us.
        match &self.ctx.stmt(stmt_id).kind {
            StmtKind::Block { statements } => {
                let statements = statements.clone();
                self.scopes.push(HashMap::new());
                for stmt in statements {
                    self.check_stmt(stmt);
                }
                self.scopes.pop();
            }
            StmtKind::Decl(decl_id) => {
                let decl_id = *decl_id;
                self.check_variable_decl(decl_id);
            }
            StmtKind::Expression(expr) => {
                let expr = *expr;
                self.resolve_expr(expr);
            }
            StmtKind::Assignment { dest, src } => {
                let (dest, src) = (*dest, *src);
                let dest_ty = self.resolve_expr(dest);
                let src_ty = self.resolve_expr(src);
                if let (Some(dest_ty), Some(src_ty)) = (dest_ty, src_ty) {
                    if dest_ty != src_ty {
                        if let Some(adjusted) = self.adjust_to(src, src_ty, dest_ty) {
                            let StmtKind::Assignment { src, .. } =
                                &mut self.ctx.stmts[stmt_id].kind
                            else {
                                return;
                            };
                            *src = adjusted;
                        } else {
                            let (l, r) = (self.type_name(dest_ty), self.type_name(src_ty));
                            self.report(pos, ErrorMessage::MismatchedTypes { left: l, right: r });
                        }
                    }
                }
            }
            StmtKind::If {
                cond,
                then_block,
                else_stmt,
            } => {
                let (cond, then_block, else_stmt) = (*cond, *then_block, *else_stmt);
                if let Some(adjusted) = self.check_condition(cond, true) {
                    if let StmtKind::If { cond, .. } = &mut self.ctx.stmts[stmt_id].kind {
                        *cond = adjusted;
                    }
                }
                self.check_stmt(then_block);
                if let Some(else_stmt) = else_stmt {
                    self.check_stmt(else_stmt);
                }
            }
            StmtKind::For {
                init,
                cond,
                next,
                body,
            } => {
                let (init, cond, next, body) = (*init, *cond, *next, *body);
                self.scopes.push(HashMap::new());
                if let Some(init) = init {
                    self.check_stmt(init);
                }
                if let Some(cond_expr) = cond {
                    if let Some(adjusted) = self.check_condition(cond_expr, false) {
                        if let StmtKind::For { cond, .. } = &mut self.ctx.stmts[stmt_id].kind {
                            *cond = Some(adjusted);
                        }
                    }
                }
                if let Some(next) = next {
                    self.check_stmt(next);
                }
                self.check_stmt(body);
                self.scopes.pop();
            }
            StmtKind::Return { value } => {
                let value = *value;
                let Some(expected) = self.current_ret else {
                    self.report(pos, ErrorMessage::ReturnOutsideFunction);
                    return;
                };
                match value {
                    None => {
                        if !self.ctx.types.is_nil(expected) {
                            let name = self.type_name(expected);
                            self.report(pos, ErrorMessage::MissingReturnValue(name));
                        }
                    }
                    Some(expr) => {
                        if self.ctx.types.is_nil(expected) {
                            self.report(pos, ErrorMessage::UnexpectedReturnValue);
                            return;
                        }
                        let Some(got) = self.resolve_expr(expr) else {
                            return;
                        };
                        if got != expected {
                            if let Some(adjusted) = self.adjust_to(expr, got, expected) {
                                if let StmtKind::Return { value } =
                                    &mut self.ctx.stmts[stmt_id].kind
                                {
                                    *value = Some(adjusted);
                                }
                            } else {
                                let (e, g) = (self.type_name(expected), self.type_name(got));
                                self.report(
                                    pos,
                                    ErrorMessage::MismatchedReturnType { expected: e, got: g },
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    /// Check a loop or branch condition. Returns a replacement expression id
    /// when an implicit SQL-bool collapse was synthesized.
    fn check_condition(&mut self, cond: ExprId, is_if: bool) -> Option<ExprId> {
        let ty = self.resolve_expr(cond)?;
        if self.ctx.types.is_bool(ty) {
            return None;
        }
        if self.ctx.types.is_builtin(ty, BuiltinKind::Boolean) {
            let pos = self.ctx.expr(cond).pos;
            let bool_ty = self.ctx.types.builtin(BuiltinKind::Bool);
            let cast = self.ctx.exprs.alloc(Expr {
                pos,
                kind: ExprKind::ImplicitCast {
                    cast: CastKind::SqlBoolToBool,
                    input: cond,
                },
            });
            self.ctx.set_expr_type(cast, bool_ty);
            return Some(cast);
        }
        let pos = self.ctx.expr(cond).pos;
        self.report(
            pos,
            if is_if {
                ErrorMessage::NonBoolIfCondition
            } else {
                ErrorMessage::NonBoolForCondition
            },
        );
        None
    }

    fn check_variable_decl(&mut self, decl_id: DeclId) {
        let (pos, name, type_repr, init) = match self.ctx.decl(decl_id).kind {
            DeclKind::Variable {
                name,
                type_repr,
                init,
            } => (self.ctx.decl(decl_id).pos, name, type_repr, init),
            _ => return,
        };

        let declared = type_repr.and_then(|repr| self.resolve_type_repr(repr));
        let initialized = init.and_then(|expr| self.resolve_expr(expr));

        let ty = match (declared, init) {
            (Some(declared), Some(init_expr)) => {
                if let Some(init_ty) = initialized {
                    if init_ty != declared {
                        if let Some(adjusted) = self.adjust_to(init_expr, init_ty, declared) {
                            if let DeclKind::Variable { init, .. } =
                                &mut self.ctx.decls[decl_id].kind
                            {
                                *init = Some(adjusted);
                            }
                        } else {
                            let (l, r) = (self.type_name(declared), self.type_name(init_ty));
                            self.report(pos, ErrorMessage::MismatchedTypes { left: l, right: r });
                        }
                    }
                }
                Some(declared)
            }
            (Some(declared), None) => Some(declared),
            (None, Some(_)) => initialized,
            (None, None) => None,
        };

        if let Some(ty) = ty {
            self.define(pos, name, ty);
        }
    }

    // ---------------------------------------------------------------
    // Expressions
    // ---------------------------------------------------------------

    /// Wrap `expr` (of type `from`) so it has type `to`, if an implicit
    /// conversion applies. Returns the replacement expression id.
    fn adjust_to(&mut self, expr: ExprId, from: TypeId, to: TypeId) -> Option<ExprId> {
        let cast = if self.ctx.types.is_integer(from) && self.ctx.types.is_integer(to) {
            // Integer literals (and integer-typed values at boundaries)
            // widen or narrow implicitly.
            if !self.is_integer_literal(expr) && !self.widens(from, to) {
                return None;
            }
            CastKind::IntegralCast
        } else if self.ctx.types.is_integer(from)
            && self.ctx.types.is_builtin(to, BuiltinKind::Integer)
        {
            CastKind::IntToSqlInt
        } else if self.ctx.types.is_float(from) && self.ctx.types.is_builtin(to, BuiltinKind::Real)
        {
            CastKind::FloatToSqlReal
        } else if self.ctx.types.is_builtin(from, BuiltinKind::Boolean)
            && self.ctx.types.is_bool(to)
        {
            CastKind::SqlBoolToBool
        } else {
            return None;
        };
        let pos = self.ctx.expr(expr).pos;
        let node = self.ctx.exprs.alloc(Expr {
            pos,
            kind: ExprKind::ImplicitCast { cast, input: expr },
        });
        self.ctx.set_expr_type(node, to);
        Some(node)
    }

    /// A widening integer conversion preserving signedness.
    fn widens(&self, from: TypeId, to: TypeId) -> bool {
        let (Some(f), Some(t)) = (self.ctx.types.as_builtin(from), self.ctx.types.as_builtin(to))
        else {
            return false;
        };
        f.is_signed() == t.is_signed()
            && self.ctx.types.size_of(from) <= self.ctx.types.size_of(to)
    }

    fn is_integer_literal(&self, expr: ExprId) -> bool {
        matches!(
            self.ctx.expr(expr).kind,
            ExprKind::Literal(LitValue::Int(_))
        )
    }

    fn resolve_expr(&mut self, expr_id: ExprId) -> Option<TypeId> {
        if let Some(ty) = self.ctx.expr_type(expr_id) {
            return Some(ty);
        }
        let ty = self.resolve_expr_impl(expr_id)?;
        self.ctx.set_expr_type(expr_id, ty);
        Some(ty)
    }

    fn resolve_expr_impl(&mut self, expr_id: ExprId) -> Option<TypeId> {
        let pos = self.ctx.expr(expr_id).pos;
        match &self.ctx.expr(expr_id).kind {
            ExprKind::Bad => None,
            ExprKind::Literal(lit) => {
                let kind = match lit {
                    LitValue::Nil => BuiltinKind::Nil,
                    LitValue::Bool(_) => BuiltinKind::Bool,
                    LitValue::Int(_) => BuiltinKind::Int32,
                    LitValue::Float(_) => BuiltinKind::Float32,
                    LitValue::String(_) => BuiltinKind::StringVal,
                };
                Some(self.ctx.types.builtin(kind))
            }
            ExprKind::Identifier { name } => {
                let name = *name;
                if let Some(ty) = self.lookup(name) {
                    return Some(ty);
                }
                if let Some(&ty) = self.functions.get(&name) {
                    return Some(ty);
                }
                let text = self.ctx.resolve(name).to_string();
                self.report(pos, ErrorMessage::UndefinedVariable(text));
                None
            }
            ExprKind::Unary { op, operand } => {
                let (op, operand) = (*op, *operand);
                self.check_unary(expr_id, pos, op, operand)
            }
            ExprKind::Binary { op, left, right } => {
                let (op, left, right) = (*op, *left, *right);
                self.check_binary(expr_id, pos, op, left, right)
            }
            ExprKind::Comparison { op, left, right } => {
                let (op, left, right) = (*op, *left, *right);
                self.check_comparison(expr_id, pos, op, left, right)
            }
            ExprKind::Call { kind, func, args } => {
                let (kind, func, args) = (*kind, *func, args.clone());
                match kind {
                    CallKind::Regular => self.check_call(expr_id, pos, func, &args),
                    CallKind::Builtin => self.check_builtin_call(expr_id, pos, func, &args),
                }
            }
            ExprKind::Member { object, member } => {
                let (object, member) = (*object, *member);
                let obj_ty = self.resolve_expr(object)?;
                // Sugared arrow: a pointer to a struct dereferences
                // implicitly on member access.
                let struct_ty = self.ctx.types.pointee(obj_ty).unwrap_or(obj_ty);
                match self.ctx.types.struct_field(struct_ty, member) {
                    Some((field_ty, _)) => Some(field_ty),
                    None => {
                        if matches!(self.ctx.types.get(struct_ty).kind, TypeKind::Struct { .. }) {
                            let field = self.ctx.resolve(member).to_string();
                            let ty = self.type_name(struct_ty);
                            self.report(pos, ErrorMessage::FieldNotFound { field, ty });
                        } else {
                            let ty = self.type_name(obj_ty);
                            self.report(pos, ErrorMessage::NotAStruct(ty));
                        }
                        None
                    }
                }
            }
            ExprKind::Index { object, index } => {
                let (object, index) = (*object, *index);
                let obj_ty = self.resolve_expr(object)?;
                let idx_ty = self.resolve_expr(index)?;
                if !self.ctx.types.is_integer(idx_ty) {
                    self.report(pos, ErrorMessage::NonIntegerIndex);
                    return None;
                }
                match self.ctx.types.get(obj_ty).kind {
                    TypeKind::Array { len, elem } => {
                        if len > 0 {
                            if let ExprKind::Literal(LitValue::Int(n)) = self.ctx.expr(index).kind
                            {
                                if n < 0 || n as u64 >= len {
                                    self.report(
                                        pos,
                                        ErrorMessage::ArrayIndexOutOfRange { index: n, len },
                                    );
                                }
                            }
                        }
                        Some(elem)
                    }
                    _ => {
                        let ty = self.type_name(obj_ty);
                        self.report(
                            pos,
                            ErrorMessage::InvalidOperation {
                                op: "[]".to_string(),
                                ty,
                            },
                        );
                        None
                    }
                }
            }
            ExprKind::ImplicitCast { .. } => self.ctx.expr_type(expr_id),
            ExprKind::FunctionLit { type_repr, .. } => {
                let type_repr = *type_repr;
                self.resolve_type_repr(type_repr)
            }
            kind if kind.is_type_repr() => self.resolve_type_repr(expr_id),
            _ => None,
        }
    }

    fn check_unary(
        &mut self,
        _expr_id: ExprId,
        pos: SourcePos,
        op: UnaryOp,
        operand: ExprId,
    ) -> Option<TypeId> {
        let ty = self.resolve_expr(operand)?;
        match op {
            UnaryOp::Neg => {
                if self.ctx.types.is_arithmetic(ty) {
                    Some(ty)
                } else {
                    let name = self.type_name(ty);
                    self.report(
                        pos,
                        ErrorMessage::InvalidOperation {
                            op: "-".into(),
                            ty: name,
                        },
                    );
                    None
                }
            }
            UnaryOp::Not => {
                if self.ctx.types.is_bool(ty) {
                    Some(ty)
                } else {
                    let name = self.type_name(ty);
                    self.report(
                        pos,
                        ErrorMessage::InvalidOperation {
                            op: "!".into(),
                            ty: name,
                        },
                    );
                    None
                }
            }
            UnaryOp::BitNot => {
                if self.ctx.types.is_integer(ty) {
                    Some(ty)
                } else {
                    let name = self.type_name(ty);
                    self.report(
                        pos,
                        ErrorMessage::InvalidOperation {
                            op: "~".into(),
                            ty: name,
                        },
                    );
                    None
                }
            }
            UnaryOp::AddressOf => Some(self.ctx.types.pointer_to(ty)),
            UnaryOp::Deref => match self.ctx.types.pointee(ty) {
                Some(pointee) => Some(pointee),
                None => {
                    let name = self.type_name(ty);
                    self.report(pos, ErrorMessage::CannotDereference(name));
                    None
                }
            },
        }
    }

    fn check_binary(
        &mut self,
        expr_id: ExprId,
        pos: SourcePos,
        op: BinaryOp,
        left: ExprId,
        right: ExprId,
    ) -> Option<TypeId> {
        let left_ty = self.resolve_expr(left)?;
        let right_ty = self.resolve_expr(right)?;

        match op {
            BinaryOp::And | BinaryOp::Or => {
                let bool_ty = self.ctx.types.builtin(BuiltinKind::Bool);
                for (side, ty) in [(left, left_ty), (right, right_ty)] {
                    if ty == bool_ty {
                        continue;
                    }
                    if let Some(adjusted) = self.adjust_to(side, ty, bool_ty) {
                        self.replace_binary_operand(expr_id, side, adjusted);
                    } else {
                        let name = self.type_name(ty);
                        let op_name = if op == BinaryOp::And { "and" } else { "or" };
                        self.report(
                            pos,
                            ErrorMessage::InvalidOperation {
                                op: op_name.into(),
                                ty: name,
                            },
                        );
                        return None;
                    }
                }
                Some(bool_ty)
            }
            BinaryOp::BitAnd
            | BinaryOp::BitOr
            | BinaryOp::BitXor
            | BinaryOp::Shl
            | BinaryOp::Shr => self.unify_arithmetic(expr_id, pos, op, left, left_ty, right, right_ty, true),
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
                // SQL value arithmetic: both sides (after implicit wrapping)
                // must be the same SQL type; NULLs propagate at runtime.
                let sql_int = self.ctx.types.builtin(BuiltinKind::Integer);
                let sql_real = self.ctx.types.builtin(BuiltinKind::Real);
                for sql_ty in [sql_int, sql_real] {
                    if left_ty == sql_ty || right_ty == sql_ty {
                        for (side, ty) in [(left, left_ty), (right, right_ty)] {
                            if ty == sql_ty {
                                continue;
                            }
                            if let Some(adjusted) = self.adjust_to(side, ty, sql_ty) {
                                self.replace_binary_operand(expr_id, side, adjusted);
                            } else {
                                let (l, r) =
                                    (self.type_name(left_ty), self.type_name(right_ty));
                                self.report(
                                    pos,
                                    ErrorMessage::MismatchedTypes { left: l, right: r },
                                );
                                return None;
                            }
                        }
                        return Some(sql_ty);
                    }
                }
                self.unify_arithmetic(expr_id, pos, op, left, left_ty, right, right_ty, false)
            }
        }
    }

    /// Unify two primitive operand types, adjusting integer literals toward
    /// the non-literal side. `integers_only` restricts to integer types.
    #[allow(clippy::too_many_arguments)]
    fn unify_arithmetic(
        &mut self,
        expr_id: ExprId,
        pos: SourcePos,
        op: BinaryOp,
        left: ExprId,
        left_ty: TypeId,
        right: ExprId,
        right_ty: TypeId,
        integers_only: bool,
    ) -> Option<TypeId> {
        let ok = |s: &Self, ty: TypeId| {
            if integers_only {
                s.ctx.types.is_integer(ty)
            } else {
                s.ctx.types.is_arithmetic(ty)
            }
        };
        if !ok(self, left_ty) || !ok(self, right_ty) {
            let bad = if ok(self, left_ty) { right_ty } else { left_ty };
            let name = self.type_name(bad);
            self.report(
                pos,
                ErrorMessage::InvalidOperation {
                    op: format!("{op:?}"),
                    ty: name,
                },
            );
            return None;
        }
        if left_ty == right_ty {
            return Some(left_ty);
        }
        // Integer literals bend toward the non-literal side.
        if self.is_integer_literal(right) {
            if let Some(adjusted) = self.adjust_to(right, right_ty, left_ty) {
                self.replace_binary_operand(expr_id, right, adjusted);
                return Some(left_ty);
            }
        }
        if self.is_integer_literal(left) {
            if let Some(adjusted) = self.adjust_to(left, left_ty, right_ty) {
                self.replace_binary_operand(expr_id, left, adjusted);
                return Some(right_ty);
            }
        }
        let (l, r) = (self.type_name(left_ty), self.type_name(right_ty));
        self.report(pos, ErrorMessage::MismatchedTypes { left: l, right: r });
        None
    }

    /// Swap a child of a binary/comparison node for its cast-wrapped form.
    fn replace_binary_operand(&mut self, expr_id: ExprId, old: ExprId, new: ExprId) {
        match &mut self.ctx.exprs[expr_id].kind {
            ExprKind::Binary { left, right, .. } | ExprKind::Comparison { left, right, .. } => {
                if *left == old {
                    *left = new;
                } else if *right == old {
                    *right = new;
                }
            }
            _ => {}
        }
    }

    fn check_comparison(
        &mut self,
        expr_id: ExprId,
        pos: SourcePos,
        op: crate::ast::ComparisonOp,
        left: ExprId,
        right: ExprId,
    ) -> Option<TypeId> {
        let left_ty = self.resolve_expr(left)?;
        let right_ty = self.resolve_expr(right)?;
        let bool_ty = self.ctx.types.builtin(BuiltinKind::Bool);

        // Pointer comparisons: identical pointee, equality only. The `nil`
        // literal compares against any pointer.
        let left_ptr = self.ctx.types.is_pointer(left_ty);
        let right_ptr = self.ctx.types.is_pointer(right_ty);
        if left_ptr || right_ptr {
            if !op.is_equality() {
                self.report(
                    pos,
                    ErrorMessage::InvalidPointerComparison(format!("{op:?}")),
                );
                return None;
            }
            let left_nil = self.ctx.types.is_nil(left_ty);
            let right_nil = self.ctx.types.is_nil(right_ty);
            if left_ptr && right_ptr && left_ty != right_ty {
                let (l, r) = (self.type_name(left_ty), self.type_name(right_ty));
                self.report(
                    pos,
                    ErrorMessage::MismatchedPointerComparison { left: l, right: r },
                );
                return None;
            }
            if (left_ptr && (right_ptr || right_nil)) || (right_ptr && left_nil) {
                return Some(bool_ty);
            }
            let (l, r) = (self.type_name(left_ty), self.type_name(right_ty));
            self.report(pos, ErrorMessage::MismatchedTypes { left: l, right: r });
            return None;
        }

        // SQL value comparisons produce SQL booleans (three-valued logic).
        let sql_tys = [
            BuiltinKind::Integer,
            BuiltinKind::Real,
            BuiltinKind::StringVal,
            BuiltinKind::Date,
            BuiltinKind::Timestamp,
        ];
        for kind in sql_tys {
            let sql_ty = self.ctx.types.builtin(kind);
            if left_ty == sql_ty || right_ty == sql_ty {
                for (side, ty) in [(left, left_ty), (right, right_ty)] {
                    if ty == sql_ty {
                        continue;
                    }
                    if let Some(adjusted) = self.adjust_to(side, ty, sql_ty) {
                        self.replace_binary_operand(expr_id, side, adjusted);
                    } else {
                        let (l, r) = (self.type_name(left_ty), self.type_name(right_ty));
                        self.report(pos, ErrorMessage::MismatchedTypes { left: l, right: r });
                        return None;
                    }
                }
                return Some(self.ctx.types.builtin(BuiltinKind::Boolean));
            }
        }

        // Primitive comparisons.
        if left_ty == right_ty
            && (self.ctx.types.is_arithmetic(left_ty)
                || (self.ctx.types.is_bool(left_ty) && op.is_equality()))
        {
            return Some(bool_ty);
        }
        if self.ctx.types.is_arithmetic(left_ty) && self.ctx.types.is_arithmetic(right_ty) {
            if self.is_integer_literal(right) {
                if let Some(adjusted) = self.adjust_to(right, right_ty, left_ty) {
                    self.replace_binary_operand(expr_id, right, adjusted);
                    return Some(bool_ty);
                }
            }
            if self.is_integer_literal(left) {
                if let Some(adjusted) = self.adjust_to(left, left_ty, right_ty) {
                    self.replace_binary_operand(expr_id, left, adjusted);
                    return Some(bool_ty);
                }
            }
        }
        let (l, r) = (self.type_name(left_ty), self.type_name(right_ty));
        self.report(pos, ErrorMessage::MismatchedTypes { left: l, right: r });
        None
    }

    fn check_call(
        &mut self,
        _expr_id: ExprId,
        pos: SourcePos,
        func: ExprId,
        args: &[ExprId],
    ) -> Option<TypeId> {
        let name = match self.ctx.expr(func).kind {
            ExprKind::Identifier { name } => name,
            _ => {
                self.report(pos, ErrorMessage::NonFunction("<expr>".into()));
                return None;
            }
        };
        let text = self.ctx.resolve(name).to_string();
        let Some(&fn_ty) = self.functions.get(&name) else {
            self.report(pos, ErrorMessage::NonFunction(text));
            return None;
        };
        self.ctx.set_expr_type(func, fn_ty);
        let (params, ret) = match &self.ctx.types.get(fn_ty).kind {
            TypeKind::Function { params, ret } => (params.clone(), *ret),
            _ => return None,
        };
        if args.len() < params.len() {
            self.report(pos, ErrorMessage::NotEnoughCallArgs(text));
            return Some(ret);
        }
        if args.len() > params.len() {
            self.report(pos, ErrorMessage::TooManyCallArgs(text));
            return Some(ret);
        }
        for (index, (&arg, param)) in args.iter().zip(&params).enumerate() {
            let Some(arg_ty) = self.resolve_expr(arg) else {
                continue;
            };
            if arg_ty != param.ty {
                if let Some(adjusted) = self.adjust_to(arg, arg_ty, param.ty) {
                    // Patch the argument list in place.
                    if let ExprKind::Call { args, .. } = &mut self.ctx.exprs[_expr_id].kind {
                        args[index] = adjusted;
                    }
                } else {
                    let (expected, got) = (self.type_name(param.ty), self.type_name(arg_ty));
                    self.report(
                        pos,
                        ErrorMessage::IncorrectCallArg {
                            index,
                            expected,
                            got,
                            func: text.clone(),
                        },
                    );
                }
            }
        }
        Some(ret)
    }

    fn check_builtin_call(
        &mut self,
        expr_id: ExprId,
        pos: SourcePos,
        func: ExprId,
        args: &[ExprId],
    ) -> Option<TypeId> {
        let name = match self.ctx.expr(func).kind {
            ExprKind::Identifier { name } => name,
            _ => return None,
        };
        let text = self.ctx.resolve(name).to_string();
        let Some(builtin) = Builtin::from_name(&text) else {
            self.report(pos, ErrorMessage::UnknownBuiltin(text));
            return None;
        };
        self.ctx.set_builtin_call(expr_id, builtin);
        self.check_builtin_signature(expr_id, pos, builtin, args)
    }

    // -----------------------------------------------------------------
    // Builtin signatures
    // -----------------------------------------------------------------

    fn builtin_ty(&self, kind: BuiltinKind) -> TypeId {
        self.ctx.types.builtin(kind)
    }

    fn ptr_to_builtin(&mut self, kind: BuiltinKind) -> TypeId {
        let inner = self.ctx.types.builtin(kind);
        self.ctx.types.pointer_to(inner)
    }

    fn arg_count(&mut self, pos: SourcePos, builtin: Builtin, args: &[ExprId], n: usize) -> bool {
        if args.len() < n {
            self.report(pos, ErrorMessage::NotEnoughCallArgs(builtin.name().into()));
            false
        } else if args.len() > n {
            self.report(pos, ErrorMessage::TooManyCallArgs(builtin.name().into()));
            false
        } else {
            true
        }
    }

    /// Check that `arg` is a pointer to the given runtime builtin.
    fn expect_ptr_to(
        &mut self,
        pos: SourcePos,
        builtin: Builtin,
        index: usize,
        arg: ExprId,
        kind: BuiltinKind,
    ) -> bool {
        let Some(ty) = self.resolve_expr(arg) else {
            return false;
        };
        let ok = self
            .ctx
            .types
            .pointee(ty)
            .is_some_and(|p| self.ctx.types.is_builtin(p, kind));
        if !ok {
            let got = self.type_name(ty);
            self.report(
                pos,
                ErrorMessage::IncorrectCallArg {
                    index,
                    expected: format!("*{}", kind.tpl_name()),
                    got,
                    func: builtin.name().into(),
                },
            );
        }
        ok
    }

    fn expect_any_pointer(
        &mut self,
        pos: SourcePos,
        builtin: Builtin,
        index: usize,
        arg: ExprId,
    ) -> bool {
        let Some(ty) = self.resolve_expr(arg) else {
            return false;
        };
        let ok = self.ctx.types.is_pointer(ty);
        if !ok {
            let got = self.type_name(ty);
            self.report(
                pos,
                ErrorMessage::IncorrectCallArg {
                    index,
                    expected: "pointer".into(),
                    got,
                    func: builtin.name().into(),
                },
            );
        }
        ok
    }

    fn expect_integer(
        &mut self,
        pos: SourcePos,
        builtin: Builtin,
        index: usize,
        arg: ExprId,
    ) -> bool {
        let Some(ty) = self.resolve_expr(arg) else {
            return false;
        };
        let ok = self.ctx.types.is_integer(ty);
        if !ok {
            let got = self.type_name(ty);
            self.report(
                pos,
                ErrorMessage::IncorrectCallArg {
                    index,
                    expected: "integer".into(),
                    got,
                    func: builtin.name().into(),
                },
            );
        }
        ok
    }

    /// Check that `arg` is a declared function with `param_count` parameters.
    fn expect_function(
        &mut self,
        pos: SourcePos,
        builtin: Builtin,
        index: usize,
        arg: ExprId,
        param_count: usize,
    ) -> bool {
        let Some(ty) = self.resolve_expr(arg) else {
            return false;
        };
        let ok = match &self.ctx.types.get(ty).kind {
            TypeKind::Function { params, .. } => params.len() == param_count,
            _ => false,
        };
        if !ok {
            let got = self.type_name(ty);
            self.report(
                pos,
                ErrorMessage::IncorrectCallArg {
                    index,
                    expected: format!("function with {param_count} parameters"),
                    got,
                    func: builtin.name().into(),
                },
            );
        }
        ok
    }

    fn expect_sql_value(
        &mut self,
        call: ExprId,
        pos: SourcePos,
        builtin: Builtin,
        index: usize,
        arg: ExprId,
        kind: BuiltinKind,
    ) -> bool {
        let Some(ty) = self.resolve_expr(arg) else {
            return false;
        };
        if self.ctx.types.is_builtin(ty, kind) {
            return true;
        }
        let target = self.builtin_ty(kind);
        if let Some(adjusted) = self.adjust_to(arg, ty, target) {
            if let ExprKind::Call { args, .. } = &mut self.ctx.exprs[call].kind {
                args[index] = adjusted;
            }
            return true;
        }
        let got = self.type_name(ty);
        self.report(
            pos,
            ErrorMessage::IncorrectCallArg {
                index,
                expected: kind.tpl_name().into(),
                got,
                func: builtin.name().into(),
            },
        );
        false
    }

    #[allow(clippy::match_same_arms)]
    fn check_builtin_signature(
        &mut self,
        expr_id: ExprId,
        pos: SourcePos,
        builtin: Builtin,
        args: &[ExprId],
    ) -> Option<TypeId> {
        use Builtin as B;
        use BuiltinKind as K;

        let nil = self.builtin_ty(K::Nil);
        let boolean = self.builtin_ty(K::Boolean);
        let bool_ty = self.builtin_ty(K::Bool);

        let result = match builtin {
            B::BoolToSql => {
                self.arg_count(pos, builtin, args, 1);
                boolean
            }
            B::IntToSql => {
                if self.arg_count(pos, builtin, args, 1) {
                    self.expect_integer(pos, builtin, 0, args[0]);
                }
                self.builtin_ty(K::Integer)
            }
            B::FloatToSql => {
                self.arg_count(pos, builtin, args, 1);
                if let Some(ty) = args.first().and_then(|&a| self.resolve_expr(a)) {
                    if !self.ctx.types.is_float(ty) {
                        let got = self.type_name(ty);
                        self.report(
                            pos,
                            ErrorMessage::IncorrectCallArg {
                                index: 0,
                                expected: "float".into(),
                                got,
                                func: builtin.name().into(),
                            },
                        );
                    }
                }
                self.builtin_ty(K::Real)
            }
            B::StringToSql => {
                self.arg_count(pos, builtin, args, 1);
                if let Some(&arg) = args.first() {
                    self.resolve_expr(arg);
                }
                self.builtin_ty(K::StringVal)
            }
            B::DateToSql => {
                if self.arg_count(pos, builtin, args, 3) {
                    for (i, &arg) in args.iter().enumerate() {
                        self.expect_integer(pos, builtin, i, arg);
                    }
                }
                self.builtin_ty(K::Date)
            }
            B::SqlToBool => {
                if self.arg_count(pos, builtin, args, 1) {
                    self.expect_sql_value(expr_id, pos, builtin, 0, args[0], K::Boolean);
                }
                bool_ty
            }
            B::Acos | B::Asin | B::Atan | B::Cos | B::Cot | B::Sin | B::Tan => {
                if self.arg_count(pos, builtin, args, 1) {
                    self.expect_sql_value(expr_id, pos, builtin, 0, args[0], K::Real);
                }
                self.builtin_ty(K::Real)
            }
            B::Atan2 => {
                if self.arg_count(pos, builtin, args, 2) {
                    self.expect_sql_value(expr_id, pos, builtin, 0, args[0], K::Real);
                    self.expect_sql_value(expr_id, pos, builtin, 1, args[1], K::Real);
                }
                self.builtin_ty(K::Real)
            }
            B::Like => {
                if self.arg_count(pos, builtin, args, 2) {
                    self.expect_sql_value(expr_id, pos, builtin, 0, args[0], K::StringVal);
                    self.expect_sql_value(expr_id, pos, builtin, 1, args[1], K::StringVal);
                }
                boolean
            }
            B::InitSqlNull => {
                if !self.arg_count(pos, builtin, args, 1) {
                    return None;
                }
                let ty = self.expr_as_type(args[0])?;
                self.ctx.set_expr_type(args[0], ty);
                if !self.ctx.types.is_sql_value(ty) {
                    self.report(pos, ErrorMessage::ExpectingType);
                    return None;
                }
                ty
            }
            B::IsValNull | B::IsValNotNull => {
                if self.arg_count(pos, builtin, args, 1) {
                    if let Some(ty) = self.resolve_expr(args[0]) {
                        if !self.ctx.types.is_sql_value(ty) {
                            let got = self.type_name(ty);
                            self.report(
                                pos,
                                ErrorMessage::IncorrectCallArg {
                                    index: 0,
                                    expected: "SQL value".into(),
                                    got,
                                    func: builtin.name().into(),
                                },
                            );
                        }
                    }
                }
                bool_ty
            }
            B::Hash => {
                if args.is_empty() {
                    self.report(pos, ErrorMessage::NotEnoughCallArgs(builtin.name().into()));
                }
                for (i, &arg) in args.iter().enumerate() {
                    let Some(ty) = self.resolve_expr(arg) else {
                        continue;
                    };
                    if !self.ctx.types.is_sql_value(ty) {
                        let got = self.type_name(ty);
                        self.report(
                            pos,
                            ErrorMessage::IncorrectCallArg {
                                index: i,
                                expected: "SQL value".into(),
                                got,
                                func: builtin.name().into(),
                            },
                        );
                    }
                }
                self.builtin_ty(K::UInt64)
            }

            B::FilterManagerInit => {
                if self.arg_count(pos, builtin, args, 1) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::FilterManager);
                }
                nil
            }
            B::FilterManagerInsertFilter => {
                if args.len() < 2 {
                    self.report(pos, ErrorMessage::NotEnoughCallArgs(builtin.name().into()));
                } else {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::FilterManager);
                    for (i, &arg) in args.iter().enumerate().skip(1) {
                        self.expect_function(pos, builtin, i, arg, 2);
                    }
                }
                nil
            }
            B::FilterManagerRunFilters => {
                if self.arg_count(pos, builtin, args, 2) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::FilterManager);
                    self.expect_ptr_to(pos, builtin, 1, args[1], K::VectorProjectionIterator);
                }
                nil
            }
            B::FilterManagerFree => {
                if self.arg_count(pos, builtin, args, 1) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::FilterManager);
                }
                nil
            }

            B::TableIterInit => {
                if self.arg_count(pos, builtin, args, 3) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::TableVectorIterator);
                    self.expect_ptr_to(pos, builtin, 1, args[1], K::ExecutionContext);
                    self.expect_integer(pos, builtin, 2, args[2]);
                }
                nil
            }
            B::TableIterAdvance => {
                if self.arg_count(pos, builtin, args, 1) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::TableVectorIterator);
                }
                bool_ty
            }
            B::TableIterGetVpi => {
                if self.arg_count(pos, builtin, args, 1) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::TableVectorIterator);
                }
                self.ptr_to_builtin(K::VectorProjectionIterator)
            }
            B::TableIterClose => {
                if self.arg_count(pos, builtin, args, 1) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::TableVectorIterator);
                }
                nil
            }
            B::TableIterParallel => {
                if self.arg_count(pos, builtin, args, 4) {
                    self.expect_integer(pos, builtin, 0, args[0]);
                    self.expect_any_pointer(pos, builtin, 1, args[1]);
                    self.expect_ptr_to(pos, builtin, 2, args[2], K::ThreadStateContainer);
                    self.expect_function(pos, builtin, 3, args[3], 3);
                }
                nil
            }

            B::VpiIsFiltered | B::VpiHasNext => {
                if self.arg_count(pos, builtin, args, 1) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::VectorProjectionIterator);
                }
                bool_ty
            }
            B::VpiAdvance | B::VpiReset => {
                if self.arg_count(pos, builtin, args, 1) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::VectorProjectionIterator);
                }
                nil
            }
            B::VpiMatch => {
                if self.arg_count(pos, builtin, args, 2) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::VectorProjectionIterator);
                    if let Some(ty) = self.resolve_expr(args[1]) {
                        if !self.ctx.types.is_bool(ty) {
                            if let Some(adjusted) = self.adjust_to(args[1], ty, bool_ty) {
                                if let ExprKind::Call { args, .. } =
                                    &mut self.ctx.exprs[expr_id].kind
                                {
                                    args[1] = adjusted;
                                }
                            }
                        }
                    }
                }
                nil
            }
            B::VpiGetBool => self.vpi_get(pos, builtin, args, K::Boolean),
            B::VpiGetTinyInt | B::VpiGetSmallInt | B::VpiGetInt | B::VpiGetBigInt => {
                self.vpi_get(pos, builtin, args, K::Integer)
            }
            B::VpiGetIntNull | B::VpiGetBigIntNull => self.vpi_get(pos, builtin, args, K::Integer),
            B::VpiGetReal | B::VpiGetDouble | B::VpiGetRealNull | B::VpiGetDoubleNull => {
                self.vpi_get(pos, builtin, args, K::Real)
            }
            B::VpiGetDate | B::VpiGetDateNull => self.vpi_get(pos, builtin, args, K::Date),
            B::VpiGetString | B::VpiGetStringNull => {
                self.vpi_get(pos, builtin, args, K::StringVal)
            }
            B::VpiSetInt | B::VpiSetBigInt => self.vpi_set(expr_id, pos, builtin, args, K::Integer),
            B::VpiSetReal | B::VpiSetDouble => self.vpi_set(expr_id, pos, builtin, args, K::Real),
            B::VpiSetDate => self.vpi_set(expr_id, pos, builtin, args, K::Date),
            B::VpiSetString => self.vpi_set(expr_id, pos, builtin, args, K::StringVal),

            B::AggHashTableInit => {
                if self.arg_count(pos, builtin, args, 3) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::AggregationHashTable);
                    self.expect_ptr_to(pos, builtin, 1, args[1], K::ExecutionContext);
                    self.expect_integer(pos, builtin, 2, args[2]);
                }
                nil
            }
            B::AggHashTableInsert | B::AggHashTableInsertPartitioned => {
                if self.arg_count(pos, builtin, args, 2) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::AggregationHashTable);
                    self.expect_integer(pos, builtin, 1, args[1]);
                }
                self.ptr_to_builtin(K::UInt8)
            }
            B::AggHashTableLookup => {
                if self.arg_count(pos, builtin, args, 4) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::AggregationHashTable);
                    self.expect_integer(pos, builtin, 1, args[1]);
                    self.expect_function(pos, builtin, 2, args[2], 2);
                    self.expect_any_pointer(pos, builtin, 3, args[3]);
                }
                self.ptr_to_builtin(K::UInt8)
            }
            B::AggHashTableProcessBatch => {
                if self.arg_count(pos, builtin, args, 6) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::AggregationHashTable);
                    self.expect_ptr_to(pos, builtin, 1, args[1], K::VectorProjectionIterator);
                    // Key columns: pointer to an array of uint32 column
                    // indexes.
                    self.expect_any_pointer(pos, builtin, 2, args[2]);
                    self.expect_function(pos, builtin, 3, args[3], 2);
                    self.expect_function(pos, builtin, 4, args[4], 2);
                    if let Some(ty) = self.resolve_expr(args[5]) {
                        if !self.ctx.types.is_bool(ty) {
                            let got = self.type_name(ty);
                            self.report(
                                pos,
                                ErrorMessage::IncorrectCallArg {
                                    index: 5,
                                    expected: "bool".into(),
                                    got,
                                    func: builtin.name().into(),
                                },
                            );
                        }
                    }
                }
                nil
            }
            B::AggHashTableMovePartitions => {
                if self.arg_count(pos, builtin, args, 4) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::AggregationHashTable);
                    self.expect_ptr_to(pos, builtin, 1, args[1], K::ThreadStateContainer);
                    self.expect_integer(pos, builtin, 2, args[2]);
                    self.expect_function(pos, builtin, 3, args[3], 2);
                }
                nil
            }
            B::AggHashTableParallelPartitionedScan => {
                if self.arg_count(pos, builtin, args, 4) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::AggregationHashTable);
                    self.expect_any_pointer(pos, builtin, 1, args[1]);
                    self.expect_ptr_to(pos, builtin, 2, args[2], K::ThreadStateContainer);
                    self.expect_function(pos, builtin, 3, args[3], 3);
                }
                nil
            }
            B::AggHashTableFree => {
                if self.arg_count(pos, builtin, args, 1) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::AggregationHashTable);
                }
                nil
            }
            B::AggHashTableIterInit => {
                if self.arg_count(pos, builtin, args, 2) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::AhtIterator);
                    self.expect_ptr_to(pos, builtin, 1, args[1], K::AggregationHashTable);
                }
                nil
            }
            B::AggHashTableIterHasNext => {
                if self.arg_count(pos, builtin, args, 1) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::AhtIterator);
                }
                bool_ty
            }
            B::AggHashTableIterNext | B::AggHashTableIterClose => {
                if self.arg_count(pos, builtin, args, 1) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::AhtIterator);
                }
                nil
            }
            B::AggHashTableIterGetRow => {
                if self.arg_count(pos, builtin, args, 1) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::AhtIterator);
                }
                self.ptr_to_builtin(K::UInt8)
            }
            B::AggPartIterHasNext => {
                if self.arg_count(pos, builtin, args, 1) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::AhtOverflowPartitionIterator);
                }
                bool_ty
            }
            B::AggPartIterNext => {
                if self.arg_count(pos, builtin, args, 1) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::AhtOverflowPartitionIterator);
                }
                nil
            }
            B::AggPartIterGetHash => {
                if self.arg_count(pos, builtin, args, 1) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::AhtOverflowPartitionIterator);
                }
                self.builtin_ty(K::UInt64)
            }
            B::AggPartIterGetRow => {
                if self.arg_count(pos, builtin, args, 1) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::AhtOverflowPartitionIterator);
                }
                self.ptr_to_builtin(K::UInt8)
            }

            B::JoinHashTableInit => {
                if self.arg_count(pos, builtin, args, 3) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::JoinHashTable);
                    self.expect_ptr_to(pos, builtin, 1, args[1], K::ExecutionContext);
                    self.expect_integer(pos, builtin, 2, args[2]);
                }
                nil
            }
            B::JoinHashTableInsert => {
                if self.arg_count(pos, builtin, args, 2) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::JoinHashTable);
                    self.expect_integer(pos, builtin, 1, args[1]);
                }
                self.ptr_to_builtin(K::UInt8)
            }
            B::JoinHashTableBuild => {
                if self.arg_count(pos, builtin, args, 1) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::JoinHashTable);
                }
                nil
            }
            B::JoinHashTableBuildParallel => {
                if self.arg_count(pos, builtin, args, 3) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::JoinHashTable);
                    self.expect_ptr_to(pos, builtin, 1, args[1], K::ThreadStateContainer);
                    self.expect_integer(pos, builtin, 2, args[2]);
                }
                nil
            }
            B::JoinHashTableLookup => {
                if self.arg_count(pos, builtin, args, 3) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::JoinHashTable);
                    self.expect_ptr_to(pos, builtin, 1, args[1], K::HashTableEntryIterator);
                    self.expect_integer(pos, builtin, 2, args[2]);
                }
                nil
            }
            B::JoinHashTableFree => {
                if self.arg_count(pos, builtin, args, 1) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::JoinHashTable);
                }
                nil
            }
            B::HashTableEntryIterHasNext => {
                if self.arg_count(pos, builtin, args, 1) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::HashTableEntryIterator);
                }
                bool_ty
            }
            B::HashTableEntryIterGetRow => {
                if self.arg_count(pos, builtin, args, 1) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::HashTableEntryIterator);
                }
                self.ptr_to_builtin(K::UInt8)
            }

            B::SorterInit => {
                if self.arg_count(pos, builtin, args, 4) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::Sorter);
                    self.expect_ptr_to(pos, builtin, 1, args[1], K::ExecutionContext);
                    self.expect_function(pos, builtin, 2, args[2], 2);
                    self.expect_integer(pos, builtin, 3, args[3]);
                }
                nil
            }
            B::SorterInsert => {
                if self.arg_count(pos, builtin, args, 1) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::Sorter);
                }
                self.ptr_to_builtin(K::UInt8)
            }
            B::SorterInsertTopK => {
                if self.arg_count(pos, builtin, args, 2) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::Sorter);
                    self.expect_integer(pos, builtin, 1, args[1]);
                }
                self.ptr_to_builtin(K::UInt8)
            }
            B::SorterInsertTopKFinish => {
                if self.arg_count(pos, builtin, args, 2) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::Sorter);
                    self.expect_integer(pos, builtin, 1, args[1]);
                }
                nil
            }
            B::SorterSort | B::SorterFree => {
                if self.arg_count(pos, builtin, args, 1) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::Sorter);
                }
                nil
            }
            B::SorterSortParallel => {
                if self.arg_count(pos, builtin, args, 3) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::Sorter);
                    self.expect_ptr_to(pos, builtin, 1, args[1], K::ThreadStateContainer);
                    self.expect_integer(pos, builtin, 2, args[2]);
                }
                nil
            }
            B::SorterSortTopKParallel => {
                if self.arg_count(pos, builtin, args, 4) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::Sorter);
                    self.expect_ptr_to(pos, builtin, 1, args[1], K::ThreadStateContainer);
                    self.expect_integer(pos, builtin, 2, args[2]);
                    self.expect_integer(pos, builtin, 3, args[3]);
                }
                nil
            }
            B::SorterIterInit => {
                if self.arg_count(pos, builtin, args, 2) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::SorterIterator);
                    self.expect_ptr_to(pos, builtin, 1, args[1], K::Sorter);
                }
                nil
            }
            B::SorterIterHasNext => {
                if self.arg_count(pos, builtin, args, 1) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::SorterIterator);
                }
                bool_ty
            }
            B::SorterIterNext | B::SorterIterClose => {
                if self.arg_count(pos, builtin, args, 1) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::SorterIterator);
                }
                nil
            }
            B::SorterIterSkipRows => {
                if self.arg_count(pos, builtin, args, 2) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::SorterIterator);
                    self.expect_integer(pos, builtin, 1, args[1]);
                }
                nil
            }
            B::SorterIterGetRow => {
                if self.arg_count(pos, builtin, args, 1) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::SorterIterator);
                }
                self.ptr_to_builtin(K::UInt8)
            }

            B::ExecCtxGetTls => {
                if self.arg_count(pos, builtin, args, 1) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::ExecutionContext);
                }
                self.ptr_to_builtin(K::ThreadStateContainer)
            }
            B::TlsReset => {
                if self.arg_count(pos, builtin, args, 5) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::ThreadStateContainer);
                    self.expect_integer(pos, builtin, 1, args[1]);
                    self.expect_function(pos, builtin, 2, args[2], 2);
                    self.expect_function(pos, builtin, 3, args[3], 2);
                    self.expect_any_pointer(pos, builtin, 4, args[4]);
                }
                nil
            }
            B::TlsIterate => {
                if self.arg_count(pos, builtin, args, 3) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::ThreadStateContainer);
                    self.expect_any_pointer(pos, builtin, 1, args[1]);
                    self.expect_function(pos, builtin, 2, args[2], 2);
                }
                nil
            }
            B::TlsClear => {
                if self.arg_count(pos, builtin, args, 1) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::ThreadStateContainer);
                }
                nil
            }
            B::TlsGetCurrentThreadState => {
                if self.arg_count(pos, builtin, args, 1) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::ThreadStateContainer);
                }
                self.ptr_to_builtin(K::UInt8)
            }

            B::ResultBufferAllocRow => {
                if self.arg_count(pos, builtin, args, 1) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::ExecutionContext);
                }
                self.ptr_to_builtin(K::UInt8)
            }
            B::ResultBufferFinalize => {
                if self.arg_count(pos, builtin, args, 1) {
                    self.expect_ptr_to(pos, builtin, 0, args[0], K::ExecutionContext);
                }
                nil
            }

            B::PtrCast => {
                if !self.arg_count(pos, builtin, args, 2) {
                    return None;
                }
                let target = self.expr_as_type(args[0])?;
                if !self.ctx.types.is_pointer(target) {
                    self.report(pos, ErrorMessage::ExpectingType);
                    return None;
                }
                self.expect_any_pointer(pos, builtin, 1, args[1]);
                target
            }
            B::SizeOf => {
                if !self.arg_count(pos, builtin, args, 1) {
                    return None;
                }
                let ty = self.expr_as_type(args[0])?;
                // Force resolution so codegen can read the size.
                self.ctx.set_expr_type(args[0], ty);
                self.builtin_ty(K::UInt32)
            }
            B::OffsetOf => {
                if !self.arg_count(pos, builtin, args, 2) {
                    return None;
                }
                let ty = self.expr_as_type(args[0])?;
                self.ctx.set_expr_type(args[0], ty);
                if let ExprKind::Identifier { name } = self.ctx.expr(args[1]).kind {
                    if self.ctx.types.struct_field(ty, name).is_none() {
                        let field = self.ctx.resolve(name).to_string();
                        let ty_name = self.type_name(ty);
                        self.report(pos, ErrorMessage::FieldNotFound { field, ty: ty_name });
                    }
                }
                self.builtin_ty(K::UInt32)
            }
        };
        Some(result)
    }

    fn vpi_get(
        &mut self,
        pos: SourcePos,
        builtin: Builtin,
        args: &[ExprId],
        result: BuiltinKind,
    ) -> TypeId {
        if self.arg_count(pos, builtin, args, 2) {
            self.expect_ptr_to(pos, builtin, 0, args[0], BuiltinKind::VectorProjectionIterator);
            self.expect_integer(pos, builtin, 1, args[1]);
        }
        self.builtin_ty(result)
    }

    fn vpi_set(
        &mut self,
        call: ExprId,
        pos: SourcePos,
        builtin: Builtin,
        args: &[ExprId],
        value: BuiltinKind,
    ) -> TypeId {
        if self.arg_count(pos, builtin, args, 3) {
            self.expect_ptr_to(pos, builtin, 0, args[0], BuiltinKind::VectorProjectionIterator);
            self.expect_sql_value(call, pos, builtin, 1, args[1], value);
            self.expect_integer(pos, builtin, 2, args[2]);
        }
        self.builtin_ty(BuiltinKind::Nil)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    fn check_source(source: &str) -> AstContext {
        let mut ctx = AstContext::new();
        let file = parser::parse(source, &mut ctx);
        assert!(
            !ctx.reporter.has_errors(),
            "parse errors: {}",
            ctx.reporter.format_all()
        );
        check(&file, &mut ctx);
        ctx
    }

    fn check_errors(source: &str) -> Vec<Diagnostic> {
        let mut ctx = AstContext::new();
        let file = parser::parse(source, &mut ctx);
        check(&file, &mut ctx);
        ctx.reporter.diagnostics().to_vec()
    }

    #[test]
    fn test_simple_function_checks() {
        let ctx = check_source("fun main() -> int32 { var x: int32 = 10\n return x }");
        assert!(!ctx.reporter.has_errors());
    }

    #[test]
    fn test_undeclared_identifier() {
        let diags = check_errors("fun f() -> int32 { return y }");
        assert!(diags
            .iter()
            .any(|d| matches!(d.message, ErrorMessage::UndefinedVariable(_))));
    }

    #[test]
    fn test_redeclaration_in_same_block() {
        let diags = check_errors("fun f() -> nil { var x: int32\n var x: int64 }");
        assert!(diags
            .iter()
            .any(|d| matches!(d.message, ErrorMessage::VariableRedeclared(_))));
    }

    #[test]
    fn test_shadowing_in_nested_block_allowed() {
        let ctx = check_source("fun f() -> nil { var x: int32\n { var x: int64\n x = 2 } }");
        assert!(!ctx.reporter.has_errors());
    }

    #[test]
    fn test_integer_literal_widening() {
        let ctx = check_source("fun f() -> int64 { var x: int64 = 10\n return x + 1 }");
        assert!(!ctx.reporter.has_errors());
    }

    #[test]
    fn test_mixed_arithmetic_rejected() {
        let diags =
            check_errors("fun f() -> nil { var a: int32 = 1\n var b: float32 = 2.0\n a = a + b }");
        assert!(!diags.is_empty());
    }

    #[test]
    fn test_non_bool_condition_rejected() {
        let diags = check_errors("fun f() -> nil { if 1 { } }");
        assert!(diags
            .iter()
            .any(|d| matches!(d.message, ErrorMessage::NonBoolIfCondition)));
    }

    #[test]
    fn test_sql_bool_condition_casts() {
        // Comparing SQL integers produces a SQL boolean; the condition is
        // still accepted through an implicit three-valued collapse.
        let ctx = check_source(
            "fun f() -> nil { var a = @intToSql(1)\n var b = @intToSql(2)\n if a < b { } }",
        );
        assert!(!ctx.reporter.has_errors());
    }

    #[test]
    fn test_return_value_from_nil_function() {
        let diags = check_errors("fun f() -> nil { return 4 }");
        assert!(diags
            .iter()
            .any(|d| matches!(d.message, ErrorMessage::UnexpectedReturnValue)));
    }

    #[test]
    fn test_pointer_comparison_requires_equality() {
        let diags = check_errors(
            "fun f(a: *int32, b: *int32) -> nil { if a < b { } }",
        );
        assert!(diags
            .iter()
            .any(|d| matches!(d.message, ErrorMessage::InvalidPointerComparison(_))));
    }

    #[test]
    fn test_pointer_comparison_mismatched_pointees() {
        let diags = check_errors(
            "fun f(a: *int32, b: *int64) -> nil { if a == b { } }",
        );
        assert!(diags
            .iter()
            .any(|d| matches!(d.message, ErrorMessage::MismatchedPointerComparison { .. })));
    }

    #[test]
    fn test_const_array_index_range_check() {
        let diags = check_errors("fun f() -> nil { var a: [4]int32\n a[9] = 1 }");
        assert!(diags
            .iter()
            .any(|d| matches!(d.message, ErrorMessage::ArrayIndexOutOfRange { .. })));
    }

    #[test]
    fn test_unknown_builtin() {
        let diags = check_errors("fun f() -> nil { @noSuchThing(1) }");
        assert!(diags
            .iter()
            .any(|d| matches!(d.message, ErrorMessage::UnknownBuiltin(_))));
    }

    #[test]
    fn test_struct_member_access() {
        let ctx = check_source(
            "struct Row { a: int32\n b: int64 }\n\
             fun f(r: *Row) -> int64 { return r.b }",
        );
        assert!(!ctx.reporter.has_errors());
    }

    #[test]
    fn test_multiple_errors_accumulate() {
        let diags = check_errors("fun f() -> nil { x = 1\n y = 2 }");
        assert!(diags.len() >= 2);
    }
}
