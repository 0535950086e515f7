//! The table of TPL builtin functions.
//!
//! A builtin is a name written `@name(...)` in TPL source that resolves at
//! code-generation time to a dedicated bytecode opcode handled by the runtime
//! rather than to a regular TPL function. The semantic analyzer checks each
//! builtin call against its signature; the bytecode generator lowers it to
//! its opcode family.

macro_rules! builtins {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// Every TPL builtin function.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Builtin {
            $($variant),+
        }

        impl Builtin {
            /// The builtin's name as written after `@` in TPL source.
            pub fn name(self) -> &'static str {
                match self {
                    $(Builtin::$variant => $name),+
                }
            }

            /// Resolve a source name to a builtin.
            pub fn from_name(name: &str) -> Option<Builtin> {
                match name {
                    $($name => Some(Builtin::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

builtins! {
    // SQL value construction and collapse
    BoolToSql => "boolToSql",
    IntToSql => "intToSql",
    FloatToSql => "floatToSql",
    StringToSql => "stringToSql",
    DateToSql => "dateToSql",
    SqlToBool => "sqlToBool",

    // Numeric helpers over SQL Real values
    Acos => "acos",
    Asin => "asin",
    Atan => "atan",
    Atan2 => "atan2",
    Cos => "cos",
    Cot => "cot",
    Sin => "sin",
    Tan => "tan",

    // String matching
    Like => "like",

    // SQL NULL construction and tests
    InitSqlNull => "initSqlNull",
    IsValNull => "isValNull",
    IsValNotNull => "isValNotNull",

    // Hashing SQL values into a 64-bit hash
    Hash => "hash",

    // Filter manager
    FilterManagerInit => "filterManagerInit",
    FilterManagerInsertFilter => "filterManagerInsertFilter",
    FilterManagerRunFilters => "filterManagerRunFilters",
    FilterManagerFree => "filterManagerFree",

    // Table vector iteration
    TableIterInit => "tableIterInit",
    TableIterAdvance => "tableIterAdvance",
    TableIterGetVpi => "tableIterGetVPI",
    TableIterClose => "tableIterClose",
    TableIterParallel => "tableIterParallel",

    // Vector projection iteration
    VpiIsFiltered => "vpiIsFiltered",
    VpiHasNext => "vpiHasNext",
    VpiAdvance => "vpiAdvance",
    VpiMatch => "vpiMatch",
    VpiReset => "vpiReset",
    VpiGetBool => "vpiGetBool",
    VpiGetTinyInt => "vpiGetTinyInt",
    VpiGetSmallInt => "vpiGetSmallInt",
    VpiGetInt => "vpiGetInt",
    VpiGetBigInt => "vpiGetBigInt",
    VpiGetReal => "vpiGetReal",
    VpiGetDouble => "vpiGetDouble",
    VpiGetDate => "vpiGetDate",
    VpiGetString => "vpiGetString",
    VpiGetIntNull => "vpiGetIntNull",
    VpiGetBigIntNull => "vpiGetBigIntNull",
    VpiGetRealNull => "vpiGetRealNull",
    VpiGetDoubleNull => "vpiGetDoubleNull",
    VpiGetDateNull => "vpiGetDateNull",
    VpiGetStringNull => "vpiGetStringNull",
    VpiSetInt => "vpiSetInt",
    VpiSetBigInt => "vpiSetBigInt",
    VpiSetReal => "vpiSetReal",
    VpiSetDouble => "vpiSetDouble",
    VpiSetDate => "vpiSetDate",
    VpiSetString => "vpiSetString",

    // Aggregation hash table
    AggHashTableInit => "aggHTInit",
    AggHashTableInsert => "aggHTInsert",
    AggHashTableInsertPartitioned => "aggHTInsertPartitioned",
    AggHashTableLookup => "aggHTLookup",
    AggHashTableProcessBatch => "aggHTProcessBatch",
    AggHashTableMovePartitions => "aggHTMovePartitions",
    AggHashTableParallelPartitionedScan => "aggHTParallelPartScan",
    AggHashTableFree => "aggHTFree",
    AggHashTableIterInit => "aggHTIterInit",
    AggHashTableIterHasNext => "aggHTIterHasNext",
    AggHashTableIterNext => "aggHTIterNext",
    AggHashTableIterGetRow => "aggHTIterGetRow",
    AggHashTableIterClose => "aggHTIterClose",
    AggPartIterHasNext => "aggPartIterHasNext",
    AggPartIterNext => "aggPartIterNext",
    AggPartIterGetHash => "aggPartIterGetHash",
    AggPartIterGetRow => "aggPartIterGetRow",

    // Join hash table
    JoinHashTableInit => "joinHTInit",
    JoinHashTableInsert => "joinHTInsert",
    JoinHashTableBuild => "joinHTBuild",
    JoinHashTableBuildParallel => "joinHTBuildParallel",
    JoinHashTableLookup => "joinHTLookup",
    JoinHashTableFree => "joinHTFree",
    HashTableEntryIterHasNext => "htEntryIterHasNext",
    HashTableEntryIterGetRow => "htEntryIterGetRow",

    // Sorter
    SorterInit => "sorterInit",
    SorterInsert => "sorterInsert",
    SorterInsertTopK => "sorterInsertTopK",
    SorterInsertTopKFinish => "sorterInsertTopKFinish",
    SorterSort => "sorterSort",
    SorterSortParallel => "sorterSortParallel",
    SorterSortTopKParallel => "sorterSortTopKParallel",
    SorterFree => "sorterFree",
    SorterIterInit => "sorterIterInit",
    SorterIterHasNext => "sorterIterHasNext",
    SorterIterNext => "sorterIterNext",
    SorterIterSkipRows => "sorterIterSkipRows",
    SorterIterGetRow => "sorterIterGetRow",
    SorterIterClose => "sorterIterClose",

    // Thread-state container
    ExecCtxGetTls => "execCtxGetTLS",
    TlsReset => "tlsReset",
    TlsIterate => "tlsIterate",
    TlsClear => "tlsClear",
    TlsGetCurrentThreadState => "tlsGetCurrentThreadState",

    // Query output
    ResultBufferAllocRow => "resultBufferAllocRow",
    ResultBufferFinalize => "resultBufferFinalize",

    // Compile-time helpers
    PtrCast => "ptrCast",
    SizeOf => "sizeOf",
    OffsetOf => "offsetOf",
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_names() {
        for b in [
            Builtin::IntToSql,
            Builtin::TableIterInit,
            Builtin::JoinHashTableBuildParallel,
            Builtin::SorterSortTopKParallel,
            Builtin::PtrCast,
        ] {
            assert_eq!(Builtin::from_name(b.name()), Some(b));
        }
        assert_eq!(Builtin::from_name("noSuchBuiltin"), None);
    }
}
