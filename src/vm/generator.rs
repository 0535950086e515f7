//! AST → bytecode compilation.
//!
//! Every function compiles to a frame layout plus a run of instructions in
//! the module's shared buffer. Operands address frame slots: expression
//! compilation materializes each value into a slot and returns its
//! `LocalVar`; address computation materializes a *pointer* into a slot, and
//! stores go through that slot in `Value` address mode. A value-returning
//! function receives the caller's result address as a hidden first
//! parameter and writes through it at `return`.

use std::collections::HashMap;

use thiserror::Error;

use super::bytecodes::Bytecode;
use super::emitter::{BytecodeEmitter, BytecodeLabel};
use super::function_info::{FunctionId, FunctionInfo, LocalKind, LocalVar};
use super::module::BytecodeModule;
use crate::ast::{
    AstContext, BinaryOp, Builtin, BuiltinKind, CallKind, CastKind, DeclId, DeclKind,
    ComparisonOp, ExprId, ExprKind, File, LitValue, StmtId, StmtKind, Symbol, TypeId, TypeKind,
    UnaryOp,
};

/// Errors surfaced while lowering a checked AST. Most malformed programs are
/// rejected by sema; these cover constructs the bytecode format constrains
/// further (constant table ids, column indexes, function references).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CodegenError {
    #[error("operand must be an integer literal")]
    NonConstantOperand,
    #[error("'{0}' does not name a compiled function")]
    UnknownFunction(String),
    #[error("unsupported construct in code generation: {0}")]
    Unsupported(String),
}

/// Compile a type-checked file into a bytecode module.
pub fn compile(
    ctx: &mut AstContext,
    file: &File,
    module_name: &str,
) -> Result<BytecodeModule, CodegenError> {
    let mut generator = Generator::new(ctx);
    generator.compile_file(file)?;
    Ok(BytecodeModule::new(
        module_name,
        generator.functions,
        generator.emitter.finish(),
        generator.string_pool,
    ))
}

struct Generator<'ctx> {
    ctx: &'ctx mut AstContext,
    emitter: BytecodeEmitter,
    functions: Vec<FunctionInfo>,
    string_pool: Vec<String>,
    func_ids: HashMap<Symbol, FunctionId>,
    current: usize,
    scopes: Vec<HashMap<Symbol, (LocalVar, TypeId)>>,
}

impl<'ctx> Generator<'ctx> {
    fn new(ctx: &'ctx mut AstContext) -> Self {
        Generator {
            ctx,
            emitter: BytecodeEmitter::new(),
            functions: Vec::new(),
            string_pool: Vec::new(),
            func_ids: HashMap::new(),
            current: 0,
            scopes: Vec::new(),
        }
    }

    // ---------------------------------------------------------------
    // Type plumbing
    // ---------------------------------------------------------------

    fn expr_type(&self, expr: ExprId) -> TypeId {
        self.ctx
            .expr_type(expr)
            .unwrap_or_else(|| self.ctx.types.builtin(BuiltinKind::Nil))
    }

    fn size_of(&self, ty: TypeId) -> u32 {
        self.ctx.types.size_of(ty)
    }

    fn layout_of(&self, ty: TypeId) -> (u32, u32) {
        (self.ctx.types.size_of(ty), self.ctx.types.align_of(ty))
    }

    fn pointer_ty(&mut self) -> TypeId {
        let u8_ty = self.ctx.types.builtin(BuiltinKind::UInt8);
        self.ctx.types.pointer_to(u8_ty)
    }

    fn new_temp(&mut self, ty: TypeId) -> LocalVar {
        let (size, align) = self.layout_of(ty);
        self.functions[self.current].new_temporary(ty, size, align)
    }

    fn assign_op(size: u32) -> Bytecode {
        match size {
            1 => Bytecode::Assign1,
            2 => Bytecode::Assign2,
            4 => Bytecode::Assign4,
            _ => Bytecode::Assign8,
        }
    }

    fn deref_op(size: u32) -> Bytecode {
        match size {
            1 => Bytecode::Deref1,
            2 => Bytecode::Deref2,
            4 => Bytecode::Deref4,
            _ => Bytecode::Deref8,
        }
    }

    /// Copy a value of `ty` from slot `src` into slot `dest`.
    fn copy_slot(&mut self, dest: LocalVar, src: LocalVar, ty: TypeId) {
        let size = self.size_of(ty);
        if matches!(size, 1 | 2 | 4 | 8) {
            self.emitter.emit_assign(Self::assign_op(size), dest, src);
        } else {
            self.emitter.emit_assign_n(dest, src, size);
        }
    }

    /// Store a value of `ty` from slot `src` through the pointer held in
    /// slot `addr`.
    fn store_through(&mut self, addr: LocalVar, src: LocalVar, ty: TypeId) {
        let size = self.size_of(ty);
        if matches!(size, 1 | 2 | 4 | 8) {
            self.emitter
                .emit_assign(Self::assign_op(size), addr.value_mode(), src);
        } else {
            self.emitter.emit_assign_n(addr.value_mode(), src, size);
        }
    }

    /// Load a value of `ty` through the pointer held in slot `addr` into a
    /// fresh temporary.
    fn load_through(&mut self, addr: LocalVar, ty: TypeId) -> LocalVar {
        let dest = self.new_temp(ty);
        let size = self.size_of(ty);
        if matches!(size, 1 | 2 | 4 | 8) {
            self.emitter
                .emit_deref(Self::deref_op(size), dest, addr.value_mode());
        } else {
            self.emitter.emit_deref_n(dest, addr.value_mode(), size);
        }
        dest
    }

    fn prim_code(&self, ty: TypeId) -> u8 {
        match self.ctx.types.as_builtin(ty) {
            Some(BuiltinKind::Int8) => 0,
            Some(BuiltinKind::Int16) => 1,
            Some(BuiltinKind::Int32) => 2,
            Some(BuiltinKind::Int64) => 3,
            Some(BuiltinKind::UInt8) => 4,
            Some(BuiltinKind::UInt16) => 5,
            Some(BuiltinKind::UInt32) => 6,
            Some(BuiltinKind::UInt64) => 7,
            _ => 3,
        }
    }

    // ---------------------------------------------------------------
    // Scopes
    // ---------------------------------------------------------------

    fn define(&mut self, name: Symbol, local: LocalVar, ty: TypeId) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name, (local, ty));
        }
    }

    fn lookup(&self, name: Symbol) -> Option<(LocalVar, TypeId)> {
        for scope in self.scopes.iter().rev() {
            if let Some(&entry) = scope.get(&name) {
                return Some(entry);
            }
        }
        None
    }

    // ---------------------------------------------------------------
    // Top level
    // ---------------------------------------------------------------

    fn compile_file(&mut self, file: &File) -> Result<(), CodegenError> {
        // Assign ids in declaration order so forward calls resolve.
        for &decl_id in &file.declarations {
            if let DeclKind::Function { name, func } = self.ctx.decl(decl_id).kind {
                let id = self.functions.len() as FunctionId;
                let fn_ty = self.expr_type(func);
                let fn_name = self.ctx.resolve(name).to_string();
                self.functions.push(FunctionInfo::new(id, fn_name, fn_ty));
                self.func_ids.insert(name, id);
            }
        }
        for &decl_id in &file.declarations {
            if matches!(self.ctx.decl(decl_id).kind, DeclKind::Function { .. }) {
                self.compile_function(decl_id)?;
            }
        }
        Ok(())
    }

    fn compile_function(&mut self, decl_id: DeclId) -> Result<(), CodegenError> {
        let (name, func) = match self.ctx.decl(decl_id).kind {
            DeclKind::Function { name, func } => (name, func),
            _ => return Ok(()),
        };
        let (type_repr, body) = match self.ctx.expr(func).kind {
            ExprKind::FunctionLit { type_repr, body } => (type_repr, body),
            _ => return Ok(()),
        };
        let fn_ty = self.expr_type(type_repr);
        let (params, ret) = match &self.ctx.types.get(fn_ty).kind {
            TypeKind::Function { params, ret } => (params.clone(), *ret),
            _ => return Ok(()),
        };

        self.current = usize::from(self.func_ids[&name]);
        self.scopes.push(HashMap::new());

        // Hidden return-value pointer occupies slot zero of value-returning
        // functions.
        if !self.ctx.types.is_nil(ret) {
            let ptr_ty = self.pointer_ty();
            let (size, align) = self.layout_of(ptr_ty);
            self.functions[self.current].new_parameter(ptr_ty, "hiddenRv", size, align);
        }
        for param in &params {
            let (size, align) = self.layout_of(param.ty);
            let param_name = self.ctx.resolve(param.name).to_string();
            let local =
                self.functions[self.current].new_parameter(param.ty, param_name, size, align);
            self.define(param.name, local, param.ty);
        }

        let start = self.emitter.position();
        self.compile_stmt(body)?;
        self.emitter.emit_return();
        let end = self.emitter.position();
        self.functions[self.current].set_bytecode_range(start, end);

        self.scopes.pop();
        Ok(())
    }

    // ---------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------

    fn compile_stmt(&mut self, stmt_id: StmtId) -> Result<(), CodegenError> {
        match &self.ctx.stmt(stmt_id).kind {
            StmtKind::Block { statements } => {
                let statements = statements.clone();
                self.scopes.push(HashMap::new());
                for stmt in statements {
                    self.compile_stmt(stmt)?;
                }
                self.scopes.pop();
            }
            StmtKind::Decl(decl_id) => {
                let decl_id = *decl_id;
                self.compile_variable_decl(decl_id)?;
            }
            StmtKind::Expression(expr) => {
                let expr = *expr;
                self.compile_value(expr)?;
            }
            StmtKind::Assignment { dest, src } => {
                let (dest, src) = (*dest, *src);
                let ty = self.expr_type(src);
                let value = self.compile_value(src)?;
                match &self.ctx.expr(dest).kind {
                    ExprKind::Identifier { name } => {
                        let name = *name;
                        let (slot, slot_ty) =
                            self.lookup(name).ok_or(CodegenError::NonConstantOperand)?;
                        self.copy_slot(slot, value, slot_ty);
                    }
                    _ => {
                        let addr = self.compile_address(dest)?;
                        self.store_through(addr, value, ty);
                    }
                }
            }
            StmtKind::If {
                cond,
                then_block,
                else_stmt,
            } => {
                let (cond, then_block, else_stmt) = (*cond, *then_block, *else_stmt);
                let cond_val = self.compile_value(cond)?;
                let mut else_label = BytecodeLabel::new();
                let mut end_label = BytecodeLabel::new();
                self.emitter
                    .emit_conditional_jump(Bytecode::JumpIfFalse, cond_val, &mut else_label);
                self.compile_stmt(then_block)?;
                match else_stmt {
                    Some(else_stmt) => {
                        self.emitter.emit_jump(&mut end_label);
                        self.emitter.bind(&mut else_label);
                        self.compile_stmt(else_stmt)?;
                        self.emitter.bind(&mut end_label);
                    }
                    None => {
                        self.emitter.bind(&mut else_label);
                    }
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
                    self.compile_stmt(init)?;
                }
                let mut top_label = BytecodeLabel::new();
                let mut exit_label = BytecodeLabel::new();
                self.emitter.bind(&mut top_label);
                if let Some(cond) = cond {
                    let cond_val = self.compile_value(cond)?;
                    self.emitter.emit_conditional_jump(
                        Bytecode::JumpIfFalse,
                        cond_val,
                        &mut exit_label,
                    );
                }
                self.compile_stmt(body)?;
                if let Some(next) = next {
                    self.compile_stmt(next)?;
                }
                self.emitter.emit_jump(&mut top_label);
                self.emitter.bind(&mut exit_label);
                self.scopes.pop();
            }
            StmtKind::Return { value } => {
                let value = *value;
                if let Some(expr) = value {
                    let ty = self.expr_type(expr);
                    let result = self.compile_value(expr)?;
                    let rv = self.functions[self.current].return_value_local();
                    self.store_through(rv, result, ty);
                }
                self.emitter.emit_return();
            }
        }
        Ok(())
    }

    fn compile_variable_decl(&mut self, decl_id: DeclId) -> Result<(), CodegenError> {
        let (name, type_repr, init) = match self.ctx.decl(decl_id).kind {
            DeclKind::Variable {
                name,
                type_repr,
                init,
            } => (name, type_repr, init),
            _ => return Ok(()),
        };
        let ty = type_repr
            .and_then(|repr| self.ctx.expr_type(repr))
            .or_else(|| init.and_then(|e| self.ctx.expr_type(e)))
            .unwrap_or_else(|| self.ctx.types.builtin(BuiltinKind::Nil));

        let (size, align) = self.layout_of(ty);
        let var_name = self.ctx.resolve(name).to_string();
        let slot = self.functions[self.current].new_local(ty, var_name, LocalKind::Var, size, align);
        self.define(name, slot, ty);

        if let Some(init) = init {
            let value = self.compile_value(init)?;
            self.copy_slot(slot, value, ty);
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Expressions
    // ---------------------------------------------------------------

    fn compile_value(&mut self, expr_id: ExprId) -> Result<LocalVar, CodegenError> {
        let ty = self.expr_type(expr_id);
        match &self.ctx.expr(expr_id).kind {
            ExprKind::Literal(lit) => {
                let lit = *lit;
                self.compile_literal(lit, ty)
            }
            ExprKind::Identifier { name } => {
                let name = *name;
                self.lookup(name)
                    .map(|(slot, _)| slot)
                    .ok_or_else(|| {
                        CodegenError::UnknownFunction(self.ctx.resolve(name).to_string())
                    })
            }
            ExprKind::Unary { op, operand } => {
                let (op, operand) = (*op, *operand);
                self.compile_unary(op, operand, ty)
            }
            ExprKind::Binary { op, left, right } => {
                let (op, left, right) = (*op, *left, *right);
                self.compile_binary(op, left, right, ty)
            }
            ExprKind::Comparison { op, left, right } => {
                let (op, left, right) = (*op, *left, *right);
                self.compile_comparison(op, left, right, ty)
            }
            ExprKind::ImplicitCast { cast, input } => {
                let (cast, input) = (*cast, *input);
                self.compile_cast(cast, input, ty)
            }
            ExprKind::Call { kind, func, args } => {
                let (kind, func, args) = (*kind, *func, args.clone());
                match kind {
                    CallKind::Regular => self.compile_call(func, &args, ty),
                    CallKind::Builtin => self.compile_builtin_call(expr_id, &args, ty),
                }
            }
            ExprKind::Member { .. } | ExprKind::Index { .. } => {
                let addr = self.compile_address(expr_id)?;
                Ok(self.load_through(addr, ty))
            }
            other => Err(CodegenError::Unsupported(format!("{other:?}"))),
        }
    }

    fn compile_literal(&mut self, lit: LitValue, ty: TypeId) -> Result<LocalVar, CodegenError> {
        let dest = self.new_temp(ty);
        match lit {
            LitValue::Bool(v) => self.emitter.emit_assign_imm1(dest, i8::from(v)),
            LitValue::Nil => self.emitter.emit_assign_imm8(dest, 0),
            LitValue::Int(v) => match self.size_of(ty) {
                1 => self.emitter.emit_assign_imm1(dest, v as i8),
                2 => self.emitter.emit_assign_imm2(dest, v as i16),
                4 => self.emitter.emit_assign_imm4(dest, v as i32),
                _ => self.emitter.emit_assign_imm8(dest, v),
            },
            LitValue::Float(v) => match self.size_of(ty) {
                4 => self.emitter.emit_assign_imm4f(dest, v as f32),
                _ => self.emitter.emit_assign_imm8f(dest, v),
            },
            LitValue::String(sym) => {
                let text = self.ctx.resolve(sym).to_string();
                let index = self.string_pool.len() as u32;
                self.string_pool.push(text);
                self.emitter.emit_init_string(dest, index);
            }
        }
        Ok(dest)
    }

    fn compile_unary(
        &mut self,
        op: UnaryOp,
        operand: ExprId,
        ty: TypeId,
    ) -> Result<LocalVar, CodegenError> {
        match op {
            UnaryOp::AddressOf => self.compile_address(operand),
            UnaryOp::Deref => {
                let pointer = self.compile_value(operand)?;
                Ok(self.load_through(pointer, ty))
            }
            UnaryOp::Not => {
                let value = self.compile_value(operand)?;
                let dest = self.new_temp(ty);
                self.emitter.emit_unary_op(Bytecode::Not, dest, value);
                Ok(dest)
            }
            UnaryOp::Neg => {
                let value = self.compile_value(operand)?;
                let dest = self.new_temp(ty);
                let opcode = match self.ctx.types.as_builtin(ty) {
                    Some(BuiltinKind::Int8) => Bytecode::NegI8,
                    Some(BuiltinKind::Int16) => Bytecode::NegI16,
                    Some(BuiltinKind::Int32) => Bytecode::NegI32,
                    Some(BuiltinKind::Float32) => Bytecode::NegF32,
                    Some(BuiltinKind::Float64) => Bytecode::NegF64,
                    _ => Bytecode::NegI64,
                };
                self.emitter.emit_unary_op(opcode, dest, value);
                Ok(dest)
            }
            UnaryOp::BitNot => {
                let value = self.compile_value(operand)?;
                let dest = self.new_temp(ty);
                let opcode = match self.ctx.types.as_builtin(ty) {
                    Some(BuiltinKind::Int8) => Bytecode::BitNegI8,
                    Some(BuiltinKind::Int16) => Bytecode::BitNegI16,
                    Some(BuiltinKind::Int32) => Bytecode::BitNegI32,
                    Some(BuiltinKind::UInt8) => Bytecode::BitNegU8,
                    Some(BuiltinKind::UInt16) => Bytecode::BitNegU16,
                    Some(BuiltinKind::UInt32) => Bytecode::BitNegU32,
                    Some(BuiltinKind::UInt64) => Bytecode::BitNegU64,
                    _ => Bytecode::BitNegI64,
                };
                self.emitter.emit_unary_op(opcode, dest, value);
                Ok(dest)
            }
        }
    }

    fn arith_opcode(op: BinaryOp, kind: BuiltinKind) -> Bytecode {
        use Bytecode as B;
        use BuiltinKind as K;
        macro_rules! pick {
            ($i8:ident, $i16:ident, $i32:ident, $i64:ident, $u8:ident, $u16:ident, $u32:ident, $u64:ident, $f32:ident, $f64:ident) => {
                match kind {
                    K::Int8 => B::$i8,
                    K::Int16 => B::$i16,
                    K::Int32 => B::$i32,
                    K::UInt8 => B::$u8,
                    K::UInt16 => B::$u16,
                    K::UInt32 => B::$u32,
                    K::UInt64 => B::$u64,
                    K::Float32 => B::$f32,
                    K::Float64 => B::$f64,
                    _ => B::$i64,
                }
            };
        }
        match op {
            BinaryOp::Add => {
                pick!(AddI8, AddI16, AddI32, AddI64, AddU8, AddU16, AddU32, AddU64, AddF32, AddF64)
            }
            BinaryOp::Sub => {
                pick!(SubI8, SubI16, SubI32, SubI64, SubU8, SubU16, SubU32, SubU64, SubF32, SubF64)
            }
            BinaryOp::Mul => {
                pick!(MulI8, MulI16, MulI32, MulI64, MulU8, MulU16, MulU32, MulU64, MulF32, MulF64)
            }
            BinaryOp::Div => {
                pick!(DivI8, DivI16, DivI32, DivI64, DivU8, DivU16, DivU32, DivU64, DivF32, DivF64)
            }
            BinaryOp::Rem => {
                pick!(RemI8, RemI16, RemI32, RemI64, RemU8, RemU16, RemU32, RemU64, RemF32, RemF64)
            }
            BinaryOp::BitAnd => pick!(
                BitAndI8, BitAndI16, BitAndI32, BitAndI64, BitAndU8, BitAndU16, BitAndU32,
                BitAndU64, BitAndI64, BitAndI64
            ),
            BinaryOp::BitOr => pick!(
                BitOrI8, BitOrI16, BitOrI32, BitOrI64, BitOrU8, BitOrU16, BitOrU32, BitOrU64,
                BitOrI64, BitOrI64
            ),
            BinaryOp::BitXor => pick!(
                BitXorI8, BitXorI16, BitXorI32, BitXorI64, BitXorU8, BitXorU16, BitXorU32,
                BitXorU64, BitXorI64, BitXorI64
            ),
            BinaryOp::Shl => pick!(
                ShlI8, ShlI16, ShlI32, ShlI64, ShlU8, ShlU16, ShlU32, ShlU64, ShlI64, ShlI64
            ),
            BinaryOp::Shr => pick!(
                ShrI8, ShrI16, ShrI32, ShrI64, ShrU8, ShrU16, ShrU32, ShrU64, ShrI64, ShrI64
            ),
            BinaryOp::And | BinaryOp::Or => unreachable!("logical ops are short-circuited"),
        }
    }

    fn sql_arith_opcode(op: BinaryOp, kind: BuiltinKind) -> Bytecode {
        use Bytecode as B;
        let real = kind == BuiltinKind::Real;
        match op {
            BinaryOp::Add => {
                if real {
                    B::AddReal
                } else {
                    B::AddInteger
                }
            }
            BinaryOp::Sub => {
                if real {
                    B::SubReal
                } else {
                    B::SubInteger
                }
            }
            BinaryOp::Mul => {
                if real {
                    B::MulReal
                } else {
                    B::MulInteger
                }
            }
            BinaryOp::Div => {
                if real {
                    B::DivReal
                } else {
                    B::DivInteger
                }
            }
            _ => {
                if real {
                    B::RemReal
                } else {
                    B::RemInteger
                }
            }
        }
    }

    fn compile_binary(
        &mut self,
        op: BinaryOp,
        left: ExprId,
        right: ExprId,
        ty: TypeId,
    ) -> Result<LocalVar, CodegenError> {
        if matches!(op, BinaryOp::And | BinaryOp::Or) {
            // Short-circuit evaluation into a boolean slot.
            let dest = self.new_temp(ty);
            let lhs = self.compile_value(left)?;
            self.emitter.emit_assign(Bytecode::Assign1, dest, lhs);
            let mut end = BytecodeLabel::new();
            let jump = if op == BinaryOp::And {
                Bytecode::JumpIfFalse
            } else {
                Bytecode::JumpIfTrue
            };
            self.emitter.emit_conditional_jump(jump, dest, &mut end);
            let rhs = self.compile_value(right)?;
            self.emitter.emit_assign(Bytecode::Assign1, dest, rhs);
            self.emitter.bind(&mut end);
            return Ok(dest);
        }

        let lhs = self.compile_value(left)?;
        let rhs = self.compile_value(right)?;
        let dest = self.new_temp(ty);
        let kind = self
            .ctx
            .types
            .as_builtin(ty)
            .unwrap_or(BuiltinKind::Int64);
        let opcode = if kind.is_sql_value() {
            Self::sql_arith_opcode(op, kind)
        } else {
            Self::arith_opcode(op, kind)
        };
        self.emitter.emit_binary_op(opcode, dest, lhs, rhs);
        Ok(dest)
    }

    fn compile_comparison(
        &mut self,
        op: ComparisonOp,
        left: ExprId,
        right: ExprId,
        result_ty: TypeId,
    ) -> Result<LocalVar, CodegenError> {
        use Bytecode as B;
        use BuiltinKind as K;

        let left_ty = self.expr_type(left);
        let lhs = self.compile_value(left)?;
        let rhs = self.compile_value(right)?;
        let dest = self.new_temp(result_ty);

        // SQL comparisons yield SQL booleans.
        if self.ctx.types.is_builtin(result_ty, K::Boolean) {
            let sql_kind = self
                .ctx
                .types
                .as_builtin(left_ty)
                .unwrap_or(K::Integer);
            let opcode = match (sql_kind, op) {
                (K::Integer, ComparisonOp::Eq) => B::EqInteger,
                (K::Integer, ComparisonOp::Ne) => B::NeInteger,
                (K::Integer, ComparisonOp::Lt) => B::LtInteger,
                (K::Integer, ComparisonOp::Le) => B::LeInteger,
                (K::Integer, ComparisonOp::Gt) => B::GtInteger,
                (K::Integer, ComparisonOp::Ge) => B::GeInteger,
                (K::Real, ComparisonOp::Eq) => B::EqReal,
                (K::Real, ComparisonOp::Ne) => B::NeReal,
                (K::Real, ComparisonOp::Lt) => B::LtReal,
                (K::Real, ComparisonOp::Le) => B::LeReal,
                (K::Real, ComparisonOp::Gt) => B::GtReal,
                (K::Real, ComparisonOp::Ge) => B::GeReal,
                (K::StringVal, ComparisonOp::Eq) => B::EqString,
                (K::StringVal, ComparisonOp::Ne) => B::NeString,
                (K::StringVal, ComparisonOp::Lt) => B::LtString,
                (K::StringVal, ComparisonOp::Le) => B::LeString,
                (K::StringVal, ComparisonOp::Gt) => B::GtString,
                (K::StringVal, ComparisonOp::Ge) => B::GeString,
                (K::Date, ComparisonOp::Eq) => B::EqDate,
                (K::Date, ComparisonOp::Ne) => B::NeDate,
                (K::Date, ComparisonOp::Lt) => B::LtDate,
                (K::Date, ComparisonOp::Le) => B::LeDate,
                (K::Date, ComparisonOp::Gt) => B::GtDate,
                (K::Date, ComparisonOp::Ge) => B::GeDate,
                (K::Timestamp, ComparisonOp::Eq) => B::EqTimestamp,
                (K::Timestamp, ComparisonOp::Ne) => B::NeTimestamp,
                (K::Timestamp, ComparisonOp::Lt) => B::LtTimestamp,
                (K::Timestamp, ComparisonOp::Le) => B::LeTimestamp,
                (K::Timestamp, ComparisonOp::Gt) => B::GtTimestamp,
                (_, ComparisonOp::Ge) => B::GeTimestamp,
                (_, _) => B::EqInteger,
            };
            self.emitter.emit_binary_op(opcode, dest, lhs, rhs);
            return Ok(dest);
        }

        // Pointer comparisons are unsigned-word comparisons.
        let kind = if self.ctx.types.is_pointer(left_ty)
            || self.ctx.types.is_nil(left_ty)
        {
            K::UInt64
        } else {
            self.ctx.types.as_builtin(left_ty).unwrap_or(K::Int64)
        };
        macro_rules! pick {
            ($i8:ident, $i16:ident, $i32:ident, $i64:ident, $u8:ident, $u16:ident, $u32:ident, $u64:ident, $f32:ident, $f64:ident) => {
                match kind {
                    K::Int8 => B::$i8,
                    K::Int16 => B::$i16,
                    K::Int32 => B::$i32,
                    K::UInt8 | K::Bool => B::$u8,
                    K::UInt16 => B::$u16,
                    K::UInt32 => B::$u32,
                    K::UInt64 => B::$u64,
                    K::Float32 => B::$f32,
                    K::Float64 => B::$f64,
                    _ => B::$i64,
                }
            };
        }
        let opcode = match op {
            ComparisonOp::Eq => {
                pick!(EqI8, EqI16, EqI32, EqI64, EqU8, EqU16, EqU32, EqU64, EqF32, EqF64)
            }
            ComparisonOp::Ne => {
                pick!(NeI8, NeI16, NeI32, NeI64, NeU8, NeU16, NeU32, NeU64, NeF32, NeF64)
            }
            ComparisonOp::Lt => {
                pick!(LtI8, LtI16, LtI32, LtI64, LtU8, LtU16, LtU32, LtU64, LtF32, LtF64)
            }
            ComparisonOp::Le => {
                pick!(LeI8, LeI16, LeI32, LeI64, LeU8, LeU16, LeU32, LeU64, LeF32, LeF64)
            }
            ComparisonOp::Gt => {
                pick!(GtI8, GtI16, GtI32, GtI64, GtU8, GtU16, GtU32, GtU64, GtF32, GtF64)
            }
            ComparisonOp::Ge => {
                pick!(GeI8, GeI16, GeI32, GeI64, GeU8, GeU16, GeU32, GeU64, GeF32, GeF64)
            }
        };
        self.emitter.emit_binary_op(opcode, dest, lhs, rhs);
        Ok(dest)
    }

    fn compile_cast(
        &mut self,
        cast: CastKind,
        input: ExprId,
        result_ty: TypeId,
    ) -> Result<LocalVar, CodegenError> {
        let input_ty = self.expr_type(input);
        let value = self.compile_value(input)?;
        match cast {
            CastKind::IntegralCast => {
                let dest = self.new_temp(result_ty);
                let src_code = self.prim_code(input_ty);
                let dest_code = self.prim_code(result_ty);
                self.emitter.emit_int_cast(dest, value, src_code, dest_code);
                Ok(dest)
            }
            CastKind::IntToSqlInt => {
                // Widen to a 64-bit payload first.
                let widened = if self.size_of(input_ty) < 8 {
                    let i64_ty = self.ctx.types.builtin(BuiltinKind::Int64);
                    let tmp = self.new_temp(i64_ty);
                    let src_code = self.prim_code(input_ty);
                    self.emitter.emit_int_cast(tmp, value, src_code, 3);
                    tmp
                } else {
                    value
                };
                let dest = self.new_temp(result_ty);
                self.emitter
                    .emit_unary_op(Bytecode::IntToSql, dest, widened);
                Ok(dest)
            }
            CastKind::FloatToSqlReal => {
                let widened = if self.size_of(input_ty) == 4 {
                    let f64_ty = self.ctx.types.builtin(BuiltinKind::Float64);
                    let tmp = self.new_temp(f64_ty);
                    self.emitter
                        .emit_unary_op(Bytecode::FloatToDouble, tmp, value);
                    tmp
                } else {
                    value
                };
                let dest = self.new_temp(result_ty);
                self.emitter
                    .emit_unary_op(Bytecode::FloatToSql, dest, widened);
                Ok(dest)
            }
            CastKind::SqlBoolToBool => {
                let dest = self.new_temp(result_ty);
                self.emitter.emit_unary_op(Bytecode::ForceTruth, dest, value);
                Ok(dest)
            }
        }
    }

    /// Compute a pointer to the lvalue named by `expr` into a fresh slot.
    fn compile_address(&mut self, expr_id: ExprId) -> Result<LocalVar, CodegenError> {
        let ptr_ty = self.pointer_ty();
        match &self.ctx.expr(expr_id).kind {
            ExprKind::Identifier { name } => {
                let name = *name;
                let (slot, _) = self
                    .lookup(name)
                    .ok_or_else(|| CodegenError::UnknownFunction(self.ctx.resolve(name).to_string()))?;
                let dest = self.new_temp(ptr_ty);
                self.emitter.emit_lea(dest, slot, 0);
                Ok(dest)
            }
            ExprKind::Unary {
                op: UnaryOp::Deref,
                operand,
            } => {
                let operand = *operand;
                self.compile_value(operand)
            }
            ExprKind::Unary {
                op: UnaryOp::AddressOf,
                operand,
            } => {
                // &&x: address of a computed pointer; materialize it.
                let operand = *operand;
                let pointer = self.compile_address(operand)?;
                let dest = self.new_temp(ptr_ty);
                self.emitter.emit_lea(dest, pointer, 0);
                Ok(dest)
            }
            ExprKind::Member { object, member } => {
                let (object, member) = (*object, *member);
                let obj_ty = self.expr_type(object);
                let obj_ident = match &self.ctx.expr(object).kind {
                    ExprKind::Identifier { name } => Some(*name),
                    _ => None,
                };
                let (struct_ty, base) = match self.ctx.types.pointee(obj_ty) {
                    Some(pointee) => {
                        // Sugared arrow: base pointer value.
                        let base = self.compile_value(object)?;
                        (pointee, base.value_mode())
                    }
                    None => match obj_ident {
                        Some(name) => {
                            let (slot, slot_ty) = self.lookup(name).ok_or_else(|| {
                                CodegenError::UnknownFunction(
                                    self.ctx.resolve(name).to_string(),
                                )
                            })?;
                            (slot_ty, slot)
                        }
                        None => {
                            let inner = self.compile_address(object)?;
                            (obj_ty, inner.value_mode())
                        }
                    },
                };
                let (_, offset) = self
                    .ctx
                    .types
                    .struct_field(struct_ty, member)
                    .ok_or(CodegenError::NonConstantOperand)?;
                let dest = self.new_temp(ptr_ty);
                self.emitter.emit_lea(dest, base, offset);
                Ok(dest)
            }
            ExprKind::Index { object, index } => {
                let (object, index) = (*object, *index);
                let obj_ty = self.expr_type(object);
                let elem_ty = match self.ctx.types.get(obj_ty).kind {
                    TypeKind::Array { elem, .. } => elem,
                    _ => return Err(CodegenError::Unsupported("index target".into())),
                };
                let elem_size = self.size_of(elem_ty);
                let index_ty = self.expr_type(index);
                let mut index_val = self.compile_value(index)?;
                // LeaScaled reads a 64-bit index.
                if self.size_of(index_ty) < 8 {
                    let i64_ty = self.ctx.types.builtin(BuiltinKind::Int64);
                    let widened = self.new_temp(i64_ty);
                    let src_code = self.prim_code(index_ty);
                    self.emitter.emit_int_cast(widened, index_val, src_code, 3);
                    index_val = widened;
                }
                let obj_ident = match &self.ctx.expr(object).kind {
                    ExprKind::Identifier { name } => Some(*name),
                    _ => None,
                };
                let base = match obj_ident {
                    Some(name) => {
                        let (slot, _) = self.lookup(name).ok_or_else(|| {
                            CodegenError::UnknownFunction(self.ctx.resolve(name).to_string())
                        })?;
                        slot
                    }
                    None => {
                        let inner = self.compile_address(object)?;
                        inner.value_mode()
                    }
                };
                let dest = self.new_temp(ptr_ty);
                self.emitter
                    .emit_lea_scaled(dest, base, index_val, elem_size, 0);
                Ok(dest)
            }
            _ => Err(CodegenError::Unsupported("address of expression".into())),
        }
    }

    fn compile_call(
        &mut self,
        func: ExprId,
        args: &[ExprId],
        ret_ty: TypeId,
    ) -> Result<LocalVar, CodegenError> {
        let name = match self.ctx.expr(func).kind {
            ExprKind::Identifier { name } => name,
            _ => return Err(CodegenError::Unsupported("indirect call".into())),
        };
        let func_id = *self
            .func_ids
            .get(&name)
            .ok_or_else(|| CodegenError::UnknownFunction(self.ctx.resolve(name).to_string()))?;

        let returns_value = !self.ctx.types.is_nil(ret_ty);
        let mut operands = Vec::with_capacity(args.len() + 1);
        let result = if returns_value {
            let rv = self.new_temp(ret_ty);
            let ptr_ty = self.pointer_ty();
            let rv_ptr = self.new_temp(ptr_ty);
            self.emitter.emit_lea(rv_ptr, rv, 0);
            operands.push(rv_ptr);
            rv
        } else {
            LocalVar::invalid()
        };
        for &arg in args {
            operands.push(self.compile_value(arg)?);
        }
        self.emitter.emit_call(func_id, &operands);
        Ok(result)
    }

    // ---------------------------------------------------------------
    // Builtin calls
    // ---------------------------------------------------------------

    fn const_int(&self, expr: ExprId) -> Result<i64, CodegenError> {
        match self.ctx.expr(expr).kind {
            ExprKind::Literal(LitValue::Int(v)) => Ok(v),
            ExprKind::ImplicitCast { input, .. } => self.const_int(input),
            _ => Err(CodegenError::NonConstantOperand),
        }
    }

    fn function_ref(&self, expr: ExprId) -> Result<FunctionId, CodegenError> {
        match self.ctx.expr(expr).kind {
            ExprKind::Identifier { name } => self
                .func_ids
                .get(&name)
                .copied()
                .ok_or_else(|| CodegenError::UnknownFunction(self.ctx.resolve(name).to_string())),
            _ => Err(CodegenError::NonConstantOperand),
        }
    }

    #[allow(clippy::too_many_lines)]
    fn compile_builtin_call(
        &mut self,
        call_id: ExprId,
        args: &[ExprId],
        ret_ty: TypeId,
    ) -> Result<LocalVar, CodegenError> {
        use Builtin as Bn;
        use Bytecode as B;

        let builtin = self
            .ctx
            .builtin_call(call_id)
            .ok_or(CodegenError::NonConstantOperand)?;

        match builtin {
            Bn::BoolToSql => {
                let value = self.compile_value(args[0])?;
                let dest = self.new_temp(ret_ty);
                self.emitter.emit_unary_op(B::BoolToSql, dest, value);
                Ok(dest)
            }
            Bn::IntToSql => {
                let input_ty = self.expr_type(args[0]);
                let value = self.compile_value(args[0])?;
                let widened = if self.size_of(input_ty) < 8 {
                    let i64_ty = self.ctx.types.builtin(BuiltinKind::Int64);
                    let tmp = self.new_temp(i64_ty);
                    let src_code = self.prim_code(input_ty);
                    self.emitter.emit_int_cast(tmp, value, src_code, 3);
                    tmp
                } else {
                    value
                };
                let dest = self.new_temp(ret_ty);
                self.emitter.emit_unary_op(B::IntToSql, dest, widened);
                Ok(dest)
            }
            Bn::FloatToSql => {
                let input_ty = self.expr_type(args[0]);
                let value = self.compile_value(args[0])?;
                let widened = if self.size_of(input_ty) == 4 {
                    let f64_ty = self.ctx.types.builtin(BuiltinKind::Float64);
                    let tmp = self.new_temp(f64_ty);
                    self.emitter.emit_unary_op(B::FloatToDouble, tmp, value);
                    tmp
                } else {
                    value
                };
                let dest = self.new_temp(ret_ty);
                self.emitter.emit_unary_op(B::FloatToSql, dest, widened);
                Ok(dest)
            }
            Bn::StringToSql => self.compile_value(args[0]),
            Bn::DateToSql => {
                let mut parts = Vec::with_capacity(3);
                for &arg in &args[..3] {
                    let input_ty = self.expr_type(arg);
                    let mut value = self.compile_value(arg)?;
                    if self.size_of(input_ty) != 4 {
                        let i32_ty = self.ctx.types.builtin(BuiltinKind::Int32);
                        let tmp = self.new_temp(i32_ty);
                        let src_code = self.prim_code(input_ty);
                        self.emitter.emit_int_cast(tmp, value, src_code, 2);
                        value = tmp;
                    }
                    parts.push(value);
                }
                let dest = self.new_temp(ret_ty);
                self.emitter
                    .emit(B::DateToSql, &[dest, parts[0], parts[1], parts[2]]);
                Ok(dest)
            }
            Bn::SqlToBool => {
                let value = self.compile_value(args[0])?;
                let dest = self.new_temp(ret_ty);
                self.emitter.emit_unary_op(B::ForceTruth, dest, value);
                Ok(dest)
            }

            Bn::Acos | Bn::Asin | Bn::Atan | Bn::Cos | Bn::Cot | Bn::Sin | Bn::Tan => {
                let value = self.compile_value(args[0])?;
                let dest = self.new_temp(ret_ty);
                let opcode = match builtin {
                    Bn::Acos => B::Acos,
                    Bn::Asin => B::Asin,
                    Bn::Atan => B::Atan,
                    Bn::Cos => B::Cos,
                    Bn::Cot => B::Cot,
                    Bn::Sin => B::Sin,
                    _ => B::Tan,
                };
                self.emitter.emit_unary_op(opcode, dest, value);
                Ok(dest)
            }
            Bn::Atan2 => {
                let y = self.compile_value(args[0])?;
                let x = self.compile_value(args[1])?;
                let dest = self.new_temp(ret_ty);
                self.emitter.emit_binary_op(B::Atan2, dest, y, x);
                Ok(dest)
            }

            Bn::Like => {
                let input = self.compile_value(args[0])?;
                let pattern = self.compile_value(args[1])?;
                let dest = self.new_temp(ret_ty);
                self.emitter.emit_binary_op(B::Like, dest, input, pattern);
                Ok(dest)
            }

            Bn::InitSqlNull => {
                let value_ty = self.expr_type(args[0]);
                let dest = self.new_temp(value_ty);
                let size = self.size_of(value_ty);
                let null_offset = match self.ctx.types.as_builtin(value_ty) {
                    Some(BuiltinKind::Boolean) => {
                        std::mem::offset_of!(crate::sql::value::BoolVal, is_null)
                    }
                    Some(BuiltinKind::Real) => std::mem::offset_of!(crate::sql::value::Real, is_null),
                    Some(BuiltinKind::Decimal) => {
                        std::mem::offset_of!(crate::sql::value::DecimalVal, is_null)
                    }
                    Some(BuiltinKind::StringVal) => {
                        std::mem::offset_of!(crate::sql::value::StringVal, is_null)
                    }
                    Some(BuiltinKind::Date) => {
                        std::mem::offset_of!(crate::sql::value::DateVal, is_null)
                    }
                    Some(BuiltinKind::Timestamp) => {
                        std::mem::offset_of!(crate::sql::value::TimestampVal, is_null)
                    }
                    _ => std::mem::offset_of!(crate::sql::value::Integer, is_null),
                } as u32;
                self.emitter.emit_init_sql_null(dest, size, null_offset);
                Ok(dest)
            }
            Bn::IsValNull | Bn::IsValNotNull => {
                let arg_ty = self.expr_type(args[0]);
                let value = self.compile_value(args[0])?;
                let dest = self.new_temp(ret_ty);
                let null_offset = match self.ctx.types.as_builtin(arg_ty) {
                    Some(BuiltinKind::Boolean) => {
                        std::mem::offset_of!(crate::sql::value::BoolVal, is_null)
                    }
                    Some(BuiltinKind::Real) => std::mem::offset_of!(crate::sql::value::Real, is_null),
                    Some(BuiltinKind::Decimal) => {
                        std::mem::offset_of!(crate::sql::value::DecimalVal, is_null)
                    }
                    Some(BuiltinKind::StringVal) => {
                        std::mem::offset_of!(crate::sql::value::StringVal, is_null)
                    }
                    Some(BuiltinKind::Date) => {
                        std::mem::offset_of!(crate::sql::value::DateVal, is_null)
                    }
                    Some(BuiltinKind::Timestamp) => {
                        std::mem::offset_of!(crate::sql::value::TimestampVal, is_null)
                    }
                    _ => std::mem::offset_of!(crate::sql::value::Integer, is_null),
                } as u32;
                let opcode = if builtin == Bn::IsValNull {
                    B::ValIsNull
                } else {
                    B::ValIsNotNull
                };
                self.emitter.emit_val_null_check(opcode, dest, value, null_offset);
                Ok(dest)
            }
            Bn::Hash => {
                let dest = self.new_temp(ret_ty);
                for (i, &arg) in args.iter().enumerate() {
                    let arg_ty = self.expr_type(arg);
                    let value = self.compile_value(arg)?;
                    let opcode = match self.ctx.types.as_builtin(arg_ty) {
                        Some(BuiltinKind::Real) => B::HashReal,
                        Some(BuiltinKind::StringVal) => B::HashString,
                        Some(BuiltinKind::Date) => B::HashDate,
                        Some(BuiltinKind::Timestamp) => B::HashTimestamp,
                        _ => B::HashInt,
                    };
                    if i == 0 {
                        self.emitter.emit_unary_op(opcode, dest, value);
                    } else {
                        let u64_ty = self.ctx.types.builtin(BuiltinKind::UInt64);
                        let tmp = self.new_temp(u64_ty);
                        self.emitter.emit_unary_op(opcode, tmp, value);
                        self.emitter.emit_unary_op(B::HashCombine, dest, tmp);
                    }
                }
                Ok(dest)
            }

            Bn::FilterManagerInit
            | Bn::FilterManagerFree
            | Bn::TableIterClose
            | Bn::VpiAdvance
            | Bn::VpiReset
            | Bn::AggHashTableFree
            | Bn::AggHashTableIterNext
            | Bn::AggHashTableIterClose
            | Bn::AggPartIterNext
            | Bn::JoinHashTableBuild
            | Bn::JoinHashTableFree
            | Bn::SorterSort
            | Bn::SorterFree
            | Bn::SorterIterNext
            | Bn::SorterIterClose
            | Bn::TlsClear
            | Bn::ResultBufferFinalize => {
                let target = self.compile_value(args[0])?;
                let opcode = match builtin {
                    Bn::FilterManagerInit => B::FilterManagerInit,
                    Bn::FilterManagerFree => B::FilterManagerFree,
                    Bn::TableIterClose => B::TableVectorIteratorClose,
                    Bn::VpiAdvance => B::VpiAdvance,
                    Bn::VpiReset => B::VpiReset,
                    Bn::AggHashTableFree => B::AggregationHashTableFree,
                    Bn::AggHashTableIterNext => B::AggregationHashTableIteratorNext,
                    Bn::AggHashTableIterClose => B::AggregationHashTableIteratorFree,
                    Bn::AggPartIterNext => B::AggregationOverflowPartitionIteratorNext,
                    Bn::JoinHashTableBuild => B::JoinHashTableBuild,
                    Bn::JoinHashTableFree => B::JoinHashTableFree,
                    Bn::SorterSort => B::SorterSort,
                    Bn::SorterFree => B::SorterFree,
                    Bn::SorterIterNext => B::SorterIteratorNext,
                    Bn::SorterIterClose => B::SorterIteratorFree,
                    Bn::TlsClear => B::ThreadStateContainerClear,
                    _ => B::ResultBufferFinalize,
                };
                self.emitter.emit(opcode, &[target]);
                Ok(LocalVar::invalid())
            }

            Bn::FilterManagerInsertFilter => {
                let fm = self.compile_value(args[0])?;
                self.emitter.emit(B::FilterManagerStartNewClause, &[fm]);
                for &arg in &args[1..] {
                    let term = self.function_ref(arg)?;
                    self.emitter.emit_filter_manager_insert_term(fm, term);
                }
                Ok(LocalVar::invalid())
            }
            Bn::FilterManagerRunFilters => {
                let fm = self.compile_value(args[0])?;
                let vpi = self.compile_value(args[1])?;
                self.emitter.emit(B::FilterManagerRunFilters, &[fm, vpi]);
                Ok(LocalVar::invalid())
            }

            Bn::TableIterInit => {
                let iter = self.compile_value(args[0])?;
                let exec_ctx = self.compile_value(args[1])?;
                let table_id = self.const_int(args[2])? as u16;
                self.emitter.emit_table_iter_init(iter, exec_ctx, table_id);
                Ok(LocalVar::invalid())
            }
            Bn::TableIterAdvance | Bn::TableIterGetVpi => {
                let iter = self.compile_value(args[0])?;
                let dest = self.new_temp(ret_ty);
                let opcode = if builtin == Bn::TableIterAdvance {
                    B::TableVectorIteratorAdvance
                } else {
                    B::TableVectorIteratorGetVpi
                };
                self.emitter.emit(opcode, &[dest, iter]);
                Ok(dest)
            }
            Bn::TableIterParallel => {
                let table_id = self.const_int(args[0])? as u16;
                let query_state = self.compile_value(args[1])?;
                let tls = self.compile_value(args[2])?;
                let scan_fn = self.function_ref(args[3])?;
                self.emitter
                    .emit_parallel_scan(table_id, query_state, tls, scan_fn);
                Ok(LocalVar::invalid())
            }

            Bn::VpiIsFiltered | Bn::VpiHasNext => {
                let vpi = self.compile_value(args[0])?;
                let dest = self.new_temp(ret_ty);
                let opcode = if builtin == Bn::VpiIsFiltered {
                    B::VpiIsFiltered
                } else {
                    B::VpiHasNext
                };
                self.emitter.emit(opcode, &[dest, vpi]);
                Ok(dest)
            }
            Bn::VpiMatch => {
                let vpi = self.compile_value(args[0])?;
                let cond = self.compile_value(args[1])?;
                self.emitter.emit(B::VpiMatch, &[vpi, cond]);
                Ok(LocalVar::invalid())
            }
            Bn::VpiGetBool
            | Bn::VpiGetTinyInt
            | Bn::VpiGetSmallInt
            | Bn::VpiGetInt
            | Bn::VpiGetBigInt
            | Bn::VpiGetReal
            | Bn::VpiGetDouble
            | Bn::VpiGetDate
            | Bn::VpiGetString
            | Bn::VpiGetIntNull
            | Bn::VpiGetBigIntNull
            | Bn::VpiGetRealNull
            | Bn::VpiGetDoubleNull
            | Bn::VpiGetDateNull
            | Bn::VpiGetStringNull => {
                let vpi = self.compile_value(args[0])?;
                let col = self.const_int(args[1])? as u16;
                let dest = self.new_temp(ret_ty);
                let opcode = match builtin {
                    Bn::VpiGetBool => B::VpiGetBool,
                    Bn::VpiGetTinyInt => B::VpiGetTinyInt,
                    Bn::VpiGetSmallInt => B::VpiGetSmallInt,
                    Bn::VpiGetInt => B::VpiGetInt,
                    Bn::VpiGetBigInt => B::VpiGetBigInt,
                    Bn::VpiGetReal => B::VpiGetReal,
                    Bn::VpiGetDouble => B::VpiGetDouble,
                    Bn::VpiGetDate => B::VpiGetDate,
                    Bn::VpiGetString => B::VpiGetString,
                    Bn::VpiGetIntNull => B::VpiGetIntNull,
                    Bn::VpiGetBigIntNull => B::VpiGetBigIntNull,
                    Bn::VpiGetRealNull => B::VpiGetRealNull,
                    Bn::VpiGetDoubleNull => B::VpiGetDoubleNull,
                    Bn::VpiGetDateNull => B::VpiGetDateNull,
                    _ => B::VpiGetStringNull,
                };
                self.emitter.emit_vpi_get(opcode, dest, vpi, col);
                Ok(dest)
            }
            Bn::VpiSetInt
            | Bn::VpiSetBigInt
            | Bn::VpiSetReal
            | Bn::VpiSetDouble
            | Bn::VpiSetDate
            | Bn::VpiSetString => {
                let vpi = self.compile_value(args[0])?;
                let value = self.compile_value(args[1])?;
                let col = self.const_int(args[2])? as u16;
                let opcode = match builtin {
                    Bn::VpiSetInt => B::VpiSetInt,
                    Bn::VpiSetBigInt => B::VpiSetBigInt,
                    Bn::VpiSetReal => B::VpiSetReal,
                    Bn::VpiSetDouble => B::VpiSetDouble,
                    Bn::VpiSetDate => B::VpiSetDate,
                    _ => B::VpiSetString,
                };
                self.emitter.emit_vpi_set(opcode, vpi, value, col);
                Ok(LocalVar::invalid())
            }

            Bn::AggHashTableInit => {
                let aht = self.compile_value(args[0])?;
                let exec_ctx = self.compile_value(args[1])?;
                let payload_size = self.compile_value(args[2])?;
                self.emitter
                    .emit(B::AggregationHashTableInit, &[aht, exec_ctx, payload_size]);
                Ok(LocalVar::invalid())
            }
            Bn::AggHashTableInsert | Bn::AggHashTableInsertPartitioned => {
                let aht = self.compile_value(args[0])?;
                let hash = self.compile_value(args[1])?;
                let dest = self.new_temp(ret_ty);
                let opcode = if builtin == Bn::AggHashTableInsert {
                    B::AggregationHashTableAllocTuple
                } else {
                    B::AggregationHashTableAllocTuplePartitioned
                };
                self.emitter.emit(opcode, &[dest, aht, hash]);
                Ok(dest)
            }
            Bn::AggHashTableLookup => {
                let aht = self.compile_value(args[0])?;
                let hash = self.compile_value(args[1])?;
                let key_eq = self.function_ref(args[2])?;
                let probe = self.compile_value(args[3])?;
                let dest = self.new_temp(ret_ty);
                self.emitter.emit_agg_ht_lookup(dest, aht, hash, key_eq, probe);
                Ok(dest)
            }
            Bn::AggHashTableProcessBatch => {
                let aht = self.compile_value(args[0])?;
                let vpi = self.compile_value(args[1])?;
                let key_cols = self.compile_value(args[2])?;
                // Key count comes from the pointed-to array's length.
                let key_ty = self.expr_type(args[2]);
                let num_keys = match self
                    .ctx
                    .types
                    .pointee(key_ty)
                    .map(|p| self.ctx.types.get(p).kind.clone())
                {
                    Some(TypeKind::Array { len, .. }) => len as u16,
                    _ => 1,
                };
                let init_fn = self.function_ref(args[3])?;
                let merge_fn = self.function_ref(args[4])?;
                let partitioned = self.compile_value(args[5])?;
                self.emitter.emit_agg_ht_process_batch(
                    aht,
                    vpi,
                    num_keys,
                    key_cols,
                    init_fn,
                    merge_fn,
                    partitioned,
                );
                Ok(LocalVar::invalid())
            }
            Bn::AggHashTableMovePartitions => {
                let aht = self.compile_value(args[0])?;
                let tls = self.compile_value(args[1])?;
                let offset = self.compile_value(args[2])?;
                let merge_fn = self.function_ref(args[3])?;
                self.emitter
                    .emit_agg_ht_transfer_partitions(aht, tls, offset, merge_fn);
                Ok(LocalVar::invalid())
            }
            Bn::AggHashTableParallelPartitionedScan => {
                let aht = self.compile_value(args[0])?;
                let query_state = self.compile_value(args[1])?;
                let tls = self.compile_value(args[2])?;
                let scan_fn = self.function_ref(args[3])?;
                self.emitter
                    .emit_agg_ht_parallel_scan(aht, query_state, tls, scan_fn);
                Ok(LocalVar::invalid())
            }
            Bn::AggHashTableIterInit => {
                let iter = self.compile_value(args[0])?;
                let aht = self.compile_value(args[1])?;
                self.emitter
                    .emit(B::AggregationHashTableIteratorInit, &[iter, aht]);
                Ok(LocalVar::invalid())
            }
            Bn::AggHashTableIterHasNext | Bn::AggHashTableIterGetRow => {
                let iter = self.compile_value(args[0])?;
                let dest = self.new_temp(ret_ty);
                let opcode = if builtin == Bn::AggHashTableIterHasNext {
                    B::AggregationHashTableIteratorHasNext
                } else {
                    B::AggregationHashTableIteratorGetRow
                };
                self.emitter.emit(opcode, &[dest, iter]);
                Ok(dest)
            }
            Bn::AggPartIterHasNext | Bn::AggPartIterGetHash | Bn::AggPartIterGetRow => {
                let iter = self.compile_value(args[0])?;
                let dest = self.new_temp(ret_ty);
                let opcode = match builtin {
                    Bn::AggPartIterHasNext => B::AggregationOverflowPartitionIteratorHasNext,
                    Bn::AggPartIterGetHash => B::AggregationOverflowPartitionIteratorGetHash,
                    _ => B::AggregationOverflowPartitionIteratorGetRow,
                };
                self.emitter.emit(opcode, &[dest, iter]);
                Ok(dest)
            }

            Bn::JoinHashTableInit => {
                let jht = self.compile_value(args[0])?;
                let exec_ctx = self.compile_value(args[1])?;
                let tuple_size = self.compile_value(args[2])?;
                self.emitter
                    .emit(B::JoinHashTableInit, &[jht, exec_ctx, tuple_size]);
                Ok(LocalVar::invalid())
            }
            Bn::JoinHashTableInsert => {
                let jht = self.compile_value(args[0])?;
                let hash = self.compile_value(args[1])?;
                let dest = self.new_temp(ret_ty);
                self.emitter
                    .emit(B::JoinHashTableAllocTuple, &[dest, jht, hash]);
                Ok(dest)
            }
            Bn::JoinHashTableBuildParallel => {
                let jht = self.compile_value(args[0])?;
                let tls = self.compile_value(args[1])?;
                let offset = self.compile_value(args[2])?;
                self.emitter
                    .emit(B::JoinHashTableBuildParallel, &[jht, tls, offset]);
                Ok(LocalVar::invalid())
            }
            Bn::JoinHashTableLookup => {
                let jht = self.compile_value(args[0])?;
                let iter = self.compile_value(args[1])?;
                let hash = self.compile_value(args[2])?;
                self.emitter.emit(B::JoinHashTableLookup, &[jht, iter, hash]);
                Ok(LocalVar::invalid())
            }
            Bn::HashTableEntryIterHasNext | Bn::HashTableEntryIterGetRow => {
                let iter = self.compile_value(args[0])?;
                let dest = self.new_temp(ret_ty);
                let opcode = if builtin == Bn::HashTableEntryIterHasNext {
                    B::HashTableEntryIteratorHasNext
                } else {
                    B::HashTableEntryIteratorGetRow
                };
                self.emitter.emit(opcode, &[dest, iter]);
                Ok(dest)
            }

            Bn::SorterInit => {
                let sorter = self.compile_value(args[0])?;
                let exec_ctx = self.compile_value(args[1])?;
                let cmp_fn = self.function_ref(args[2])?;
                let tuple_size = self.compile_value(args[3])?;
                self.emitter.emit_sorter_init(sorter, exec_ctx, cmp_fn, tuple_size);
                Ok(LocalVar::invalid())
            }
            Bn::SorterInsert => {
                let sorter = self.compile_value(args[0])?;
                let dest = self.new_temp(ret_ty);
                self.emitter.emit(B::SorterAllocTuple, &[dest, sorter]);
                Ok(dest)
            }
            Bn::SorterInsertTopK => {
                let sorter = self.compile_value(args[0])?;
                let top_k = self.compile_value(args[1])?;
                let dest = self.new_temp(ret_ty);
                self.emitter
                    .emit(B::SorterAllocTupleTopK, &[dest, sorter, top_k]);
                Ok(dest)
            }
            Bn::SorterInsertTopKFinish => {
                let sorter = self.compile_value(args[0])?;
                let top_k = self.compile_value(args[1])?;
                self.emitter
                    .emit(B::SorterAllocTupleTopKFinish, &[sorter, top_k]);
                Ok(LocalVar::invalid())
            }
            Bn::SorterSortParallel => {
                let sorter = self.compile_value(args[0])?;
                let tls = self.compile_value(args[1])?;
                let offset = self.compile_value(args[2])?;
                self.emitter.emit(B::SorterSortParallel, &[sorter, tls, offset]);
                Ok(LocalVar::invalid())
            }
            Bn::SorterSortTopKParallel => {
                let sorter = self.compile_value(args[0])?;
                let tls = self.compile_value(args[1])?;
                let offset = self.compile_value(args[2])?;
                let top_k = self.compile_value(args[3])?;
                self.emitter
                    .emit(B::SorterSortTopKParallel, &[sorter, tls, offset, top_k]);
                Ok(LocalVar::invalid())
            }
            Bn::SorterIterInit => {
                let iter = self.compile_value(args[0])?;
                let sorter = self.compile_value(args[1])?;
                self.emitter.emit(B::SorterIteratorInit, &[iter, sorter]);
                Ok(LocalVar::invalid())
            }
            Bn::SorterIterHasNext | Bn::SorterIterGetRow => {
                let iter = self.compile_value(args[0])?;
                let dest = self.new_temp(ret_ty);
                let opcode = if builtin == Bn::SorterIterHasNext {
                    B::SorterIteratorHasNext
                } else {
                    B::SorterIteratorGetRow
                };
                self.emitter.emit(opcode, &[dest, iter]);
                Ok(dest)
            }
            Bn::SorterIterSkipRows => {
                let iter = self.compile_value(args[0])?;
                let n = self.compile_value(args[1])?;
                self.emitter.emit(B::SorterIteratorSkipRows, &[iter, n]);
                Ok(LocalVar::invalid())
            }

            Bn::ExecCtxGetTls => {
                let exec_ctx = self.compile_value(args[0])?;
                let dest = self.new_temp(ret_ty);
                self.emitter
                    .emit(B::ExecutionContextGetThreadStateContainer, &[dest, exec_ctx]);
                Ok(dest)
            }
            Bn::TlsReset => {
                let tls = self.compile_value(args[0])?;
                let size = self.compile_value(args[1])?;
                let init_fn = self.function_ref(args[2])?;
                let destroy_fn = self.function_ref(args[3])?;
                let ctx = self.compile_value(args[4])?;
                self.emitter.emit_tls_reset(tls, size, init_fn, destroy_fn, ctx);
                Ok(LocalVar::invalid())
            }
            Bn::TlsIterate => {
                let tls = self.compile_value(args[0])?;
                let ctx = self.compile_value(args[1])?;
                let iterate_fn = self.function_ref(args[2])?;
                self.emitter.emit_tls_iterate(tls, ctx, iterate_fn);
                Ok(LocalVar::invalid())
            }
            Bn::TlsGetCurrentThreadState => {
                let tls = self.compile_value(args[0])?;
                let dest = self.new_temp(ret_ty);
                self.emitter
                    .emit(B::ThreadStateContainerAccessCurrentThreadState, &[dest, tls]);
                Ok(dest)
            }

            Bn::ResultBufferAllocRow => {
                let exec_ctx = self.compile_value(args[0])?;
                let dest = self.new_temp(ret_ty);
                self.emitter.emit(B::ResultBufferAllocOutputRow, &[dest, exec_ctx]);
                Ok(dest)
            }

            Bn::PtrCast => self.compile_value(args[1]),
            Bn::SizeOf => {
                let target_ty = self.expr_type(args[0]);
                let dest = self.new_temp(ret_ty);
                self.emitter
                    .emit_assign_imm4(dest, self.ctx.types.size_of(target_ty) as i32);
                Ok(dest)
            }
            Bn::OffsetOf => {
                let target_ty = self.expr_type(args[0]);
                let field = match self.ctx.expr(args[1]).kind {
                    ExprKind::Identifier { name } => name,
                    _ => return Err(CodegenError::NonConstantOperand),
                };
                let offset = self
                    .ctx
                    .types
                    .struct_field(target_ty, field)
                    .map(|(_, off)| off)
                    .ok_or(CodegenError::NonConstantOperand)?;
                let dest = self.new_temp(ret_ty);
                self.emitter.emit_assign_imm4(dest, offset as i32);
                Ok(dest)
            }
        }
    }
}
