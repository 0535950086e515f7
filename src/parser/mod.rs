//! The TPL parser.
//!
//! A recursive-descent parser with precedence climbing for binary operators.
//! Errors are reported to the context's [`ErrorReporter`] and parsing
//! continues (synchronizing at declaration boundaries), so a single compile
//! can surface several diagnostics. On any error the offending construct
//! becomes a [`ExprKind::Bad`] node and code generation is later skipped.

pub mod scanner;
pub mod token;

use crate::ast::{
    AstContext, BinaryOp, CallKind, ComparisonOp, Decl, DeclId, DeclKind, Expr, ExprId, ExprKind,
    FieldRepr, File, LitValue, SourcePos, Stmt, StmtId, StmtKind, UnaryOp,
};
use crate::sema::ErrorMessage;
use scanner::{Scanner, Token};
use token::TokenKind;

/// Parse a TPL source string into a [`File`], allocating nodes into `ctx`.
pub fn parse(source: &str, ctx: &mut AstContext) -> File {
    Parser::new(source, ctx).parse_file()
}

struct Parser<'ctx, 'src> {
    scanner: Scanner<'src>,
    ctx: &'ctx mut AstContext,
    /// Identifier expressions that were written `@name`; calls through them
    /// become builtin calls.
    builtin_callees: Vec<ExprId>,
}

impl<'ctx, 'src> Parser<'ctx, 'src> {
    fn new(source: &'src str, ctx: &'ctx mut AstContext) -> Self {
        Parser {
            scanner: Scanner::new(source),
            ctx,
            builtin_callees: Vec::new(),
        }
    }

    // ---------------------------------------------------------------
    // Token plumbing
    // ---------------------------------------------------------------

    fn peek(&self) -> TokenKind {
        self.scanner.peek()
    }

    fn next(&mut self) -> Token {
        self.scanner.next_token()
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.peek() == kind {
            self.next();
            true
        } else {
            false
        }
    }

    /// Consume the next token, reporting a diagnostic if it is not `kind`.
    fn expect(&mut self, kind: TokenKind) -> Token {
        let token = self.next();
        if token.kind != kind {
            self.ctx.reporter.report(
                token.pos,
                ErrorMessage::UnexpectedToken {
                    got: token.kind.describe().to_string(),
                    want: kind.describe().to_string(),
                },
            );
        }
        token
    }

    fn bad_expr(&mut self, pos: SourcePos) -> ExprId {
        self.ctx.exprs.alloc(Expr {
            pos,
            kind: ExprKind::Bad,
        })
    }

    fn alloc_expr(&mut self, pos: SourcePos, kind: ExprKind) -> ExprId {
        self.ctx.exprs.alloc(Expr { pos, kind })
    }

    fn alloc_stmt(&mut self, pos: SourcePos, kind: StmtKind) -> StmtId {
        self.ctx.stmts.alloc(Stmt { pos, kind })
    }

    // ---------------------------------------------------------------
    // Declarations
    // ---------------------------------------------------------------

    fn parse_file(&mut self) -> File {
        let mut file = File::default();
        while self.peek() != TokenKind::Eos {
            match self.peek() {
                TokenKind::Fun => file.declarations.push(self.parse_function_decl()),
                TokenKind::Struct => file.declarations.push(self.parse_struct_decl()),
                _ => {
                    let token = self.next();
                    self.ctx.reporter.report(
                        token.pos,
                        ErrorMessage::UnexpectedToken {
                            got: token.kind.describe().to_string(),
                            want: "fun or struct".to_string(),
                        },
                    );
                    self.synchronize();
                }
            }
        }
        file
    }

    /// Skip ahead to the next declaration boundary after an error.
    fn synchronize(&mut self) {
        while !matches!(
            self.peek(),
            TokenKind::Fun | TokenKind::Struct | TokenKind::Eos
        ) {
            self.next();
        }
    }

    fn parse_function_decl(&mut self) -> DeclId {
        let start = self.expect(TokenKind::Fun);
        let name_tok = self.expect(TokenKind::Identifier);
        let name = self.ctx.intern(&name_tok.literal);

        let type_repr = self.parse_function_type();
        let body = self.parse_block();
        let func = self.alloc_expr(start.pos, ExprKind::FunctionLit { type_repr, body });

        self.ctx.decls.alloc(Decl {
            pos: start.pos,
            kind: DeclKind::Function { name, func },
        })
    }

    fn parse_struct_decl(&mut self) -> DeclId {
        let start = self.expect(TokenKind::Struct);
        let name_tok = self.expect(TokenKind::Identifier);
        let name = self.ctx.intern(&name_tok.literal);
        let type_repr = self.parse_struct_type();
        self.ctx.decls.alloc(Decl {
            pos: start.pos,
            kind: DeclKind::Struct { name, type_repr },
        })
    }

    fn parse_variable_decl(&mut self) -> DeclId {
        let start = self.expect(TokenKind::Var);
        let name_tok = self.expect(TokenKind::Identifier);
        let name = self.ctx.intern(&name_tok.literal);

        let type_repr = if self.matches(TokenKind::Colon) {
            Some(self.parse_type())
        } else {
            None
        };
        let init = if self.matches(TokenKind::Equal) {
            Some(self.parse_expr())
        } else {
            None
        };

        if type_repr.is_none() && init.is_none() {
            self.ctx.reporter.report(
                start.pos,
                ErrorMessage::UntypedVariable(name_tok.literal.clone()),
            );
        }

        self.ctx.decls.alloc(Decl {
            pos: start.pos,
            kind: DeclKind::Variable {
                name,
                type_repr,
                init,
            },
        })
    }

    // ---------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------

    fn parse_block(&mut self) -> StmtId {
        let start = self.expect(TokenKind::LeftBrace);
        let mut statements = Vec::new();
        while !matches!(self.peek(), TokenKind::RightBrace | TokenKind::Eos) {
            statements.push(self.parse_stmt());
        }
        self.expect(TokenKind::RightBrace);
        self.alloc_stmt(start.pos, StmtKind::Block { statements })
    }

    fn parse_stmt(&mut self) -> StmtId {
        match self.peek() {
            TokenKind::LeftBrace => self.parse_block(),
            TokenKind::For => self.parse_for_stmt(),
            TokenKind::If => self.parse_if_stmt(),
            TokenKind::Return => self.parse_return_stmt(),
            TokenKind::Var => {
                let decl = self.parse_variable_decl();
                let pos = self.ctx.decl(decl).pos;
                self.alloc_stmt(pos, StmtKind::Decl(decl))
            }
            _ => self.parse_simple_stmt(),
        }
    }

    /// An expression statement or an assignment.
    fn parse_simple_stmt(&mut self) -> StmtId {
        let expr = self.parse_expr();
        let pos = self.ctx.expr(expr).pos;
        if self.matches(TokenKind::Equal) {
            let src = self.parse_expr();
            self.alloc_stmt(pos, StmtKind::Assignment { dest: expr, src })
        } else {
            self.alloc_stmt(pos, StmtKind::Expression(expr))
        }
    }

    /// `for { }`, `for cond { }`, or `for init; cond; next { }`.
    fn parse_for_stmt(&mut self) -> StmtId {
        let start = self.expect(TokenKind::For);

        let (init, cond, next) = if self.peek() == TokenKind::LeftBrace {
            (None, None, None)
        } else {
            // Parse the first header component; it may turn out to be the
            // loop condition if no semicolon follows.
            let first = if self.peek() == TokenKind::Semi {
                None
            } else if self.peek() == TokenKind::Var {
                let decl = self.parse_variable_decl();
                let pos = self.ctx.decl(decl).pos;
                Some(self.alloc_stmt(pos, StmtKind::Decl(decl)))
            } else {
                Some(self.parse_simple_stmt())
            };

            if self.matches(TokenKind::Semi) {
                let cond = if self.peek() == TokenKind::Semi {
                    None
                } else {
                    Some(self.parse_expr())
                };
                self.expect(TokenKind::Semi);
                let next = if self.peek() == TokenKind::LeftBrace {
                    None
                } else {
                    Some(self.parse_simple_stmt())
                };
                (first, cond, next)
            } else {
                // While-style loop: the single header was the condition.
                let cond = first.and_then(|stmt| match self.ctx.stmt(stmt).kind {
                    StmtKind::Expression(expr) => Some(expr),
                    _ => {
                        self.ctx.reporter.report(
                            self.ctx.stmt(stmt).pos,
                            ErrorMessage::ExpectingExpression,
                        );
                        None
                    }
                });
                (None, cond, None)
            }
        };

        let body = self.parse_block();
        self.alloc_stmt(
            start.pos,
            StmtKind::For {
                init,
                cond,
                next,
                body,
            },
        )
    }

    fn parse_if_stmt(&mut self) -> StmtId {
        let start = self.expect(TokenKind::If);
        let cond = self.parse_expr();
        let then_block = self.parse_block();
        let else_stmt = if self.matches(TokenKind::Else) {
            if self.peek() == TokenKind::If {
                Some(self.parse_if_stmt())
            } else {
                Some(self.parse_block())
            }
        } else {
            None
        };
        self.alloc_stmt(
            start.pos,
            StmtKind::If {
                cond,
                then_block,
                else_stmt,
            },
        )
    }

    fn parse_return_stmt(&mut self) -> StmtId {
        let start = self.expect(TokenKind::Return);
        let value = if Self::can_start_expression(self.peek()) {
            Some(self.parse_expr())
        } else {
            None
        };
        self.alloc_stmt(start.pos, StmtKind::Return { value })
    }

    fn can_start_expression(kind: TokenKind) -> bool {
        matches!(
            kind,
            TokenKind::Identifier
                | TokenKind::BuiltinIdentifier
                | TokenKind::Integer
                | TokenKind::Float
                | TokenKind::String
                | TokenKind::True
                | TokenKind::False
                | TokenKind::Nil
                | TokenKind::LeftParen
                | TokenKind::Minus
                | TokenKind::Bang
                | TokenKind::BitNot
                | TokenKind::Ampersand
                | TokenKind::Star
        )
    }

    // ---------------------------------------------------------------
    // Expressions
    // ---------------------------------------------------------------

    fn parse_expr(&mut self) -> ExprId {
        self.parse_binary_expr(1)
    }

    fn parse_binary_expr(&mut self, min_prec: u32) -> ExprId {
        let mut left = self.parse_unary_expr();
        loop {
            let kind = self.peek();
            let prec = kind.precedence();
            if prec == 0 || prec < min_prec {
                return left;
            }
            let op_tok = self.next();
            let right = self.parse_binary_expr(prec + 1);
            let expr_kind = if kind.is_comparison() {
                let op = match kind {
                    TokenKind::EqualEqual => ComparisonOp::Eq,
                    TokenKind::BangEqual => ComparisonOp::Ne,
                    TokenKind::Less => ComparisonOp::Lt,
                    TokenKind::LessEqual => ComparisonOp::Le,
                    TokenKind::Greater => ComparisonOp::Gt,
                    _ => ComparisonOp::Ge,
                };
                ExprKind::Comparison { op, left, right }
            } else {
                let op = match kind {
                    TokenKind::Plus => BinaryOp::Add,
                    TokenKind::Minus => BinaryOp::Sub,
                    TokenKind::Star => BinaryOp::Mul,
                    TokenKind::Slash => BinaryOp::Div,
                    TokenKind::Percent => BinaryOp::Rem,
                    TokenKind::Ampersand => BinaryOp::BitAnd,
                    TokenKind::BitOr => BinaryOp::BitOr,
                    TokenKind::BitXor => BinaryOp::BitXor,
                    TokenKind::Shl => BinaryOp::Shl,
                    TokenKind::Shr => BinaryOp::Shr,
                    TokenKind::And => BinaryOp::And,
                    _ => BinaryOp::Or,
                };
                ExprKind::Binary { op, left, right }
            };
            left = self.alloc_expr(op_tok.pos, expr_kind);
        }
    }

    fn parse_unary_expr(&mut self) -> ExprId {
        let op = match self.peek() {
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Bang => Some(UnaryOp::Not),
            TokenKind::BitNot => Some(UnaryOp::BitNot),
            TokenKind::Ampersand => Some(UnaryOp::AddressOf),
            TokenKind::Star => Some(UnaryOp::Deref),
            _ => None,
        };
        if let Some(op) = op {
            let tok = self.next();
            let operand = self.parse_unary_expr();
            return self.alloc_expr(tok.pos, ExprKind::Unary { op, operand });
        }
        self.parse_postfix_expr()
    }

    /// A primary expression followed by any number of calls, member
    /// accesses, and index operations.
    fn parse_postfix_expr(&mut self) -> ExprId {
        let mut expr = self.parse_primary_expr();
        loop {
            match self.peek() {
                TokenKind::LeftParen => {
                    let lparen = self.next();
                    let mut args = Vec::new();
                    while !matches!(self.peek(), TokenKind::RightParen | TokenKind::Eos) {
                        args.push(self.parse_expr());
                        if !self.matches(TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(TokenKind::RightParen);
                    let call_kind = if self.builtin_callees.contains(&expr) {
                        CallKind::Builtin
                    } else {
                        CallKind::Regular
                    };
                    expr = self.alloc_expr(
                        lparen.pos,
                        ExprKind::Call {
                            kind: call_kind,
                            func: expr,
                            args,
                        },
                    );
                }
                TokenKind::Dot => {
                    let dot = self.next();
                    let member_tok = self.expect(TokenKind::Identifier);
                    let member = self.ctx.intern(&member_tok.literal);
                    expr = self.alloc_expr(
                        dot.pos,
                        ExprKind::Member {
                            object: expr,
                            member,
                        },
                    );
                }
                TokenKind::LeftBracket => {
                    let bracket = self.next();
                    let index = self.parse_expr();
                    self.expect(TokenKind::RightBracket);
                    expr = self.alloc_expr(
                        bracket.pos,
                        ExprKind::Index {
                            object: expr,
                            index,
                        },
                    );
                }
                _ => return expr,
            }
        }
    }

    fn parse_primary_expr(&mut self) -> ExprId {
        let token = self.next();
        match token.kind {
            TokenKind::Identifier => {
                let name = self.ctx.intern(&token.literal);
                self.alloc_expr(token.pos, ExprKind::Identifier { name })
            }
            TokenKind::BuiltinIdentifier => {
                let name = self.ctx.intern(&token.literal);
                let id = self.alloc_expr(token.pos, ExprKind::Identifier { name });
                self.builtin_callees.push(id);
                id
            }
            TokenKind::Integer => {
                let value = token.literal.parse::<i64>().unwrap_or_else(|_| {
                    self.ctx
                        .reporter
                        .report(token.pos, ErrorMessage::Lexical("bad integer".into()));
                    0
                });
                self.alloc_expr(token.pos, ExprKind::Literal(LitValue::Int(value)))
            }
            TokenKind::Float => {
                let value = token.literal.parse::<f64>().unwrap_or_else(|_| {
                    self.ctx
                        .reporter
                        .report(token.pos, ErrorMessage::Lexical("bad float".into()));
                    0.0
                });
                self.alloc_expr(token.pos, ExprKind::Literal(LitValue::Float(value)))
            }
            TokenKind::String => {
                let sym = self.ctx.intern(&token.literal);
                self.alloc_expr(token.pos, ExprKind::Literal(LitValue::String(sym)))
            }
            TokenKind::True => self.alloc_expr(token.pos, ExprKind::Literal(LitValue::Bool(true))),
            TokenKind::False => {
                self.alloc_expr(token.pos, ExprKind::Literal(LitValue::Bool(false)))
            }
            TokenKind::Nil => self.alloc_expr(token.pos, ExprKind::Literal(LitValue::Nil)),
            TokenKind::LeftParen => {
                let inner = self.parse_expr();
                self.expect(TokenKind::RightParen);
                inner
            }
            TokenKind::Error => {
                self.ctx
                    .reporter
                    .report(token.pos, ErrorMessage::Lexical(token.literal.clone()));
                self.bad_expr(token.pos)
            }
            _ => {
                self.ctx
                    .reporter
                    .report(token.pos, ErrorMessage::ExpectingExpression);
                self.bad_expr(token.pos)
            }
        }
    }

    // ---------------------------------------------------------------
    // Types
    // ---------------------------------------------------------------

    fn parse_type(&mut self) -> ExprId {
        match self.peek() {
            TokenKind::Star => {
                let star = self.next();
                let base = self.parse_type();
                self.alloc_expr(star.pos, ExprKind::PointerType { base })
            }
            TokenKind::LeftBracket => self.parse_array_type(),
            TokenKind::LeftParen => self.parse_function_type(),
            TokenKind::Struct => self.parse_struct_type(),
            TokenKind::Identifier => {
                let token = self.next();
                let name = self.ctx.intern(&token.literal);
                self.alloc_expr(token.pos, ExprKind::Identifier { name })
            }
            _ => {
                let token = self.next();
                self.ctx
                    .reporter
                    .report(token.pos, ErrorMessage::ExpectingType);
                self.bad_expr(token.pos)
            }
        }
    }

    /// `[N]T` or `[]T`.
    fn parse_array_type(&mut self) -> ExprId {
        let bracket = self.expect(TokenKind::LeftBracket);
        let len = if self.peek() == TokenKind::RightBracket {
            None
        } else {
            Some(self.parse_expr())
        };
        self.expect(TokenKind::RightBracket);
        let elem = self.parse_type();
        self.alloc_expr(bracket.pos, ExprKind::ArrayType { len, elem })
    }

    /// `(name: T, ...) -> R`.
    fn parse_function_type(&mut self) -> ExprId {
        let lparen = self.expect(TokenKind::LeftParen);
        let mut params = Vec::new();
        while !matches!(self.peek(), TokenKind::RightParen | TokenKind::Eos) {
            let name_tok = self.expect(TokenKind::Identifier);
            let name = self.ctx.intern(&name_tok.literal);
            self.expect(TokenKind::Colon);
            let type_repr = self.parse_type();
            params.push(FieldRepr {
                pos: name_tok.pos,
                name,
                type_repr,
            });
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RightParen);
        self.expect(TokenKind::Arrow);
        let ret = self.parse_type();
        self.alloc_expr(lparen.pos, ExprKind::FunctionType { params, ret })
    }

    /// `struct { field: T ... }` (fields separated by newlines, no commas).
    fn parse_struct_type(&mut self) -> ExprId {
        let brace = self.expect(TokenKind::LeftBrace);
        let mut fields = Vec::new();
        while !matches!(self.peek(), TokenKind::RightBrace | TokenKind::Eos) {
            let name_tok = self.expect(TokenKind::Identifier);
            let name = self.ctx.intern(&name_tok.literal);
            self.expect(TokenKind::Colon);
            let type_repr = self.parse_type();
            fields.push(FieldRepr {
                pos: name_tok.pos,
                name,
                type_repr,
            });
        }
        self.expect(TokenKind::RightBrace);
        self.alloc_expr(brace.pos, ExprKind::StructType { fields })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> (AstContext, File) {
        let mut ctx = AstContext::new();
        let file = parse(source, &mut ctx);
        assert!(
            !ctx.reporter.has_errors(),
            "unexpected parse errors: {}",
            ctx.reporter.format_all()
        );
        (ctx, file)
    }

    #[test]
    fn test_parse_empty_function() {
        let (ctx, file) = parse_ok("fun main() -> int32 { return 0 }");
        assert_eq!(file.declarations.len(), 1);
        match &ctx.decl(file.declarations[0]).kind {
            DeclKind::Function { name, .. } => assert_eq!(ctx.resolve(*name), "main"),
            other => panic!("expected function, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_struct_decl() {
        let (ctx, file) = parse_ok("struct Row { a: int32\n b: *int64 }");
        match &ctx.decl(file.declarations[0]).kind {
            DeclKind::Struct { name, type_repr } => {
                assert_eq!(ctx.resolve(*name), "Row");
                match &ctx.expr(*type_repr).kind {
                    ExprKind::StructType { fields } => assert_eq!(fields.len(), 2),
                    other => panic!("expected struct type, got {other:?}"),
                }
            }
            other => panic!("expected struct, got {other:?}"),
        }
    }

    #[test]
    fn test_precedence() {
        let (ctx, file) = parse_ok("fun f() -> int32 { return 1 + 2 * 3 }");
        // Walk down: fn body -> return -> binary add whose right child is mul.
        let DeclKind::Function { func, .. } = &ctx.decl(file.declarations[0]).kind else {
            panic!()
        };
        let ExprKind::FunctionLit { body, .. } = &ctx.expr(*func).kind else {
            panic!()
        };
        let StmtKind::Block { statements } = &ctx.stmt(*body).kind else {
            panic!()
        };
        let StmtKind::Return { value: Some(ret) } = &ctx.stmt(statements[0]).kind else {
            panic!()
        };
        let ExprKind::Binary { op, right, .. } = &ctx.expr(*ret).kind else {
            panic!()
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(
            ctx.expr(*right).kind,
            ExprKind::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn test_builtin_call_kind() {
        let (ctx, file) = parse_ok("fun f() -> nil { @tableIterClose(&tvi) }");
        let DeclKind::Function { func, .. } = &ctx.decl(file.declarations[0]).kind else {
            panic!()
        };
        let ExprKind::FunctionLit { body, .. } = &ctx.expr(*func).kind else {
            panic!()
        };
        let StmtKind::Block { statements } = &ctx.stmt(*body).kind else {
            panic!()
        };
        let StmtKind::Expression(call) = &ctx.stmt(statements[0]).kind else {
            panic!()
        };
        assert!(matches!(
            ctx.expr(*call).kind,
            ExprKind::Call {
                kind: CallKind::Builtin,
                ..
            }
        ));
    }

    #[test]
    fn test_for_variants() {
        parse_ok("fun f() -> nil { for { } }");
        parse_ok("fun f() -> nil { for x < 10 { } }");
        parse_ok("fun f() -> nil { for var i = 0; i < 10; i = i + 1 { } }");
    }

    #[test]
    fn test_errors_accumulate() {
        let mut ctx = AstContext::new();
        parse("fun f( -> { } fun g() -> nil { }", &mut ctx);
        assert!(ctx.reporter.has_errors());
    }

    #[test]
    fn test_pointer_and_array_types() {
        parse_ok("fun f(p: *JoinHashTable, a: [16]int32, s: []uint8) -> nil { }");
    }
}
