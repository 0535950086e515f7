//! Front-end integration: hand-written TPL programs through the full
//! parse → sema → bytecode → interpret path.

use std::sync::Arc;

use tellur::sql::{Catalog, ExecutionError};
use tellur::vm::{compile_source, CompileError, VM};

fn run(source: &str) -> Result<i64, ExecutionError> {
    let module = compile_source(source, "test").expect("compiles");
    let vm = VM::new(Arc::new(module), Arc::new(Catalog::with_test_tables()));
    let mut result: i64 = 0;
    vm.invoke_by_name("main", &[std::ptr::from_mut(&mut result) as usize])?;
    Ok(result)
}

#[test]
fn fibonacci() {
    let source = "
        fun fib(n: int64) -> int64 {
            if n < 2 {
                return n
            }
            return fib(n - 1) + fib(n - 2)
        }
        fun main() -> int64 {
            return fib(15)
        }";
    assert_eq!(run(source).expect("runs"), 610);
}

#[test]
fn nested_structs_and_pointers() {
    let source = "
        struct Inner {
            value: int64
        }
        struct Outer {
            first: Inner
            second: Inner
        }
        fun main() -> int64 {
            var o: Outer
            o.first.value = 30
            o.second.value = 12
            var p = &o
            return p.first.value + p.second.value
        }";
    assert_eq!(run(source).expect("runs"), 42);
}

#[test]
fn table_scan_counts_rows() {
    // Scans the built-in small_1 table tuple by tuple.
    let source = "
        fun main() -> int64 {
            var count: int64 = 0
            var tvi: TableVectorIterator
            @tableIterInit(&tvi, @ptrCast(*ExecutionContext, &count), 1)
            for @tableIterAdvance(&tvi) {
                var vpi = @tableIterGetVPI(&tvi)
                for ; @vpiHasNext(vpi); @vpiAdvance(vpi) {
                    count = count + 1
                }
                @vpiReset(vpi)
            }
            @tableIterClose(&tvi)
            return count
        }";
    assert_eq!(run(source).expect("runs"), 500);
}

#[test]
fn sql_value_comparisons_collapse_in_conditions() {
    let source = "
        fun main() -> int64 {
            var count: int64 = 0
            var tvi: TableVectorIterator
            @tableIterInit(&tvi, @ptrCast(*ExecutionContext, &count), 1)
            for @tableIterAdvance(&tvi) {
                var vpi = @tableIterGetVPI(&tvi)
                for ; @vpiHasNext(vpi); @vpiAdvance(vpi) {
                    var a = @vpiGetInt(vpi, 0)
                    if a < @intToSql(100) {
                        count = count + 1
                    }
                }
                @vpiReset(vpi)
            }
            @tableIterClose(&tvi)
            return count
        }";
    assert_eq!(run(source).expect("runs"), 100);
}

#[test]
fn null_columns_never_satisfy_comparisons() {
    // colB of small_1 is NULL on every 10th row; NULL comparisons are NULL
    // and collapse to false.
    let source = "
        fun main() -> int64 {
            var count: int64 = 0
            var tvi: TableVectorIterator
            @tableIterInit(&tvi, @ptrCast(*ExecutionContext, &count), 1)
            for @tableIterAdvance(&tvi) {
                var vpi = @tableIterGetVPI(&tvi)
                for ; @vpiHasNext(vpi); @vpiAdvance(vpi) {
                    var b = @vpiGetBigIntNull(vpi, 1)
                    if @isValNull(b) {
                        count = count + 1
                    }
                }
                @vpiReset(vpi)
            }
            @tableIterClose(&tvi)
            return count
        }";
    assert_eq!(run(source).expect("runs"), 50);
}

#[test]
fn like_builtin_three_valued() {
    let source = "
        fun main() -> int64 {
            var matched = @like(@stringToSql(\"database\"), @stringToSql(\"data%\"))
            if matched {
                return 1
            }
            return 0
        }";
    assert_eq!(run(source).expect("runs"), 1);
}

#[test]
fn date_builtin() {
    let source = "
        fun main() -> int64 {
            var a = @dateToSql(2024, 3, 15)
            var b = @dateToSql(2024, 3, 16)
            if a < b {
                return 1
            }
            return 0
        }";
    assert_eq!(run(source).expect("runs"), 1);
}

#[test]
fn invalid_date_is_a_conversion_error() {
    let source = "
        fun main() -> int64 {
            var bad = @dateToSql(2024, 13, 1)
            return 0
        }";
    assert!(matches!(
        run(source),
        Err(ExecutionError::Conversion(_))
    ));
}

#[test]
fn trig_builtins() {
    let source = "
        fun main() -> int64 {
            var zero = @floatToSql(0.0)
            var one = @cos(zero)
            if one > @floatToSql(0.99) {
                return 1
            }
            return 0
        }";
    assert_eq!(run(source).expect("runs"), 1);
}

#[test]
fn multiple_diagnostics_in_one_compile() {
    let err = compile_source(
        "fun f() -> nil { x = 1\n y = 2\n if 3 { } }",
        "test",
    )
    .expect_err("has errors");
    match err {
        CompileError::Diagnostics(text) => {
            assert!(text.matches("undefined").count() >= 2);
            assert!(text.contains("non-bool"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn sorter_builtins_drive_top_k() {
    let source = "
        struct Row {
            key: Integer
        }
        fun rowCmp(lhs: *Row, rhs: *Row) -> int32 {
            if @sqlToBool(lhs.key < rhs.key) {
                return -1
            }
            if @sqlToBool(lhs.key > rhs.key) {
                return 1
            }
            return 0
        }
        fun main() -> int64 {
            var dummy: int64 = 0
            var sorter: Sorter
            @sorterInit(&sorter, @ptrCast(*ExecutionContext, &dummy), rowCmp, @sizeOf(Row))
            var keys: [5]int64
            keys[0] = 3
            keys[1] = 1
            keys[2] = 4
            keys[3] = 1
            keys[4] = 5
            for var i: int64 = 0; i < 5; i = i + 1 {
                var row = @ptrCast(*Row, @sorterInsertTopK(&sorter, 2))
                row.key = @intToSql(keys[i])
                @sorterInsertTopKFinish(&sorter, 2)
            }
            @sorterSort(&sorter)
            var total: int64 = 0
            var iter: SorterIterator
            @sorterIterInit(&iter, &sorter)
            for ; @sorterIterHasNext(&iter); @sorterIterNext(&iter) {
                var row = @ptrCast(*Row, @sorterIterGetRow(&iter))
                total = total * 10
                if @sqlToBool(row.key == @intToSql(1)) {
                    total = total + 1
                }
            }
            @sorterIterClose(&iter)
            @sorterFree(&sorter)
            return total
        }";
    // Two retained rows, both with key 1.
    assert_eq!(run(source).expect("runs"), 11);
}
