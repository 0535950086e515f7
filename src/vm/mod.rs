//! The bytecode machine: instruction set, emitter, module format, the AST
//! compiler, and the interpreter.

pub mod bytecodes;
pub mod emitter;
pub mod function_info;
pub mod generator;
pub mod interp;
pub mod module;

pub use bytecodes::{Bytecode, OperandType};
pub use emitter::{BytecodeEmitter, BytecodeLabel};
pub use function_info::{AddressMode, FunctionId, FunctionInfo, LocalVar};
pub use generator::CodegenError;
pub use interp::VM;
pub use module::BytecodeModule;

use thiserror::Error;

use crate::ast::AstContext;
use crate::parser;
use crate::sema;

/// Errors from the front half of the pipeline: accumulated parse/sema
/// diagnostics, or a lowering failure.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CompileError {
    #[error("compilation failed:\n{0}")]
    Diagnostics(String),
    #[error(transparent)]
    Codegen(#[from] CodegenError),
}

/// Parse, type-check, and lower a TPL source string into a bytecode module.
/// Diagnostics accumulate across the parse and sema phases; any diagnostic
/// suppresses code generation.
pub fn compile_source(source: &str, module_name: &str) -> Result<BytecodeModule, CompileError> {
    let mut ctx = AstContext::new();
    let file = parser::parse(source, &mut ctx);
    if ctx.reporter.has_errors() {
        return Err(CompileError::Diagnostics(ctx.reporter.format_all()));
    }
    sema::check(&file, &mut ctx);
    if ctx.reporter.has_errors() {
        return Err(CompileError::Diagnostics(ctx.reporter.format_all()));
    }
    Ok(generator::compile(&mut ctx, &file, module_name)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::Catalog;
    use std::sync::Arc;

    fn run_main(source: &str) -> i64 {
        let module = compile_source(source, "test").expect("compiles");
        let vm = VM::new(Arc::new(module), Arc::new(Catalog::new()));
        let mut result: i64 = 0;
        vm.invoke_by_name("main", &[std::ptr::from_mut(&mut result) as usize])
            .expect("runs");
        result
    }

    #[test]
    fn test_return_constant() {
        assert_eq!(run_main("fun main() -> int64 { return 42 }"), 42);
    }

    #[test]
    fn test_arithmetic_and_locals() {
        let source = "
            fun main() -> int64 {
                var x: int64 = 6
                var y: int64 = 7
                return x * y
            }";
        assert_eq!(run_main(source), 42);
    }

    #[test]
    fn test_branches() {
        let source = "
            fun main() -> int64 {
                var x: int64 = 10
                if x > 5 {
                    return 1
                } else {
                    return 2
                }
            }";
        assert_eq!(run_main(source), 1);
    }

    #[test]
    fn test_loops() {
        let source = "
            fun main() -> int64 {
                var sum: int64 = 0
                for var i: int64 = 1; i <= 10; i = i + 1 {
                    sum = sum + i
                }
                return sum
            }";
        assert_eq!(run_main(source), 55);
    }

    #[test]
    fn test_while_style_loop() {
        let source = "
            fun main() -> int64 {
                var n: int64 = 1
                for n < 100 {
                    n = n * 2
                }
                return n
            }";
        assert_eq!(run_main(source), 128);
    }

    #[test]
    fn test_function_calls_with_return_values() {
        let source = "
            fun square(x: int64) -> int64 {
                return x * x
            }
            fun main() -> int64 {
                return square(5) + square(2)
            }";
        assert_eq!(run_main(source), 29);
    }

    #[test]
    fn test_struct_member_access() {
        let source = "
            struct Point {
                x: int64
                y: int64
            }
            fun main() -> int64 {
                var p: Point
                p.x = 11
                p.y = 31
                return p.x + p.y
            }";
        assert_eq!(run_main(source), 42);
    }

    #[test]
    fn test_pointers_and_deref() {
        let source = "
            fun bump(v: *int64) -> nil {
                *v = *v + 1
            }
            fun main() -> int64 {
                var x: int64 = 41
                bump(&x)
                return x
            }";
        assert_eq!(run_main(source), 42);
    }

    #[test]
    fn test_arrays() {
        let source = "
            fun main() -> int64 {
                var a: [4]int64
                a[0] = 1
                a[1] = 2
                a[2] = 3
                a[3] = 4
                return a[0] + a[1] + a[2] + a[3]
            }";
        assert_eq!(run_main(source), 10);
    }

    #[test]
    fn test_logical_short_circuit() {
        // The division would trap if the right side were evaluated.
        let source = "
            fun main() -> int64 {
                var zero: int64 = 0
                var x: int64 = 1
                if zero != 0 and x / zero > 0 {
                    return 1
                }
                return 0
            }";
        assert_eq!(run_main(source), 0);
    }

    #[test]
    fn test_division_by_zero_traps() {
        let module =
            compile_source("fun main() -> int64 { var z: int64 = 0\n return 1 / z }", "t")
                .expect("compiles");
        let vm = VM::new(Arc::new(module), Arc::new(Catalog::new()));
        let mut result: i64 = 0;
        let err = vm
            .invoke_by_name("main", &[std::ptr::from_mut(&mut result) as usize])
            .expect_err("traps");
        assert_eq!(err, crate::sql::ExecutionError::DivisionByZero);
    }

    #[test]
    fn test_sql_values_and_three_valued_logic() {
        let source = "
            fun main() -> int64 {
                var a = @intToSql(10)
                var b = @intToSql(3)
                if a > b {
                    return 1
                }
                return 0
            }";
        assert_eq!(run_main(source), 1);
    }

    #[test]
    fn test_missing_function_lookup_fails() {
        let module = compile_source("fun main() -> nil { }", "t").expect("compiles");
        let vm = VM::new(Arc::new(module), Arc::new(Catalog::new()));
        assert!(matches!(
            vm.invoke_by_name("nope", &[]),
            Err(crate::sql::ExecutionError::MissingFunction(_))
        ));
    }

    #[test]
    fn test_compile_error_reports_diagnostics() {
        let err = compile_source("fun main() -> int64 { return y }", "t").expect_err("fails");
        match err {
            CompileError::Diagnostics(text) => assert!(text.contains("undefined")),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
