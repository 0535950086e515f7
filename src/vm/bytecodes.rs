//! The bytecode instruction set.
//!
//! Opcodes are a dense `u16` enumeration encoded little-endian in the
//! instruction stream, followed by a packed sequence of typed operands.
//! Typed instruction families (arithmetic, comparison, bitwise) carry the
//! operand type in the opcode itself, one variant per primitive type, so the
//! interpreter's dispatch arm knows the concrete machine type it operates on.

/// The kinds of operands an instruction can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// A 32-bit encoded `LocalVar` (offset and address mode).
    Local,
    /// Little-endian immediates of natural width.
    Imm1,
    Imm2,
    Imm4,
    Imm8,
    /// 32-bit float immediate.
    FImm4,
    /// 64-bit float immediate.
    FImm8,
    /// Unsigned 16-bit immediate (column index, argument count).
    UImm16,
    /// Unsigned 32-bit immediate (byte sizes, string-pool index, table id).
    UImm32,
    /// 16-bit function id.
    FunctionId,
    /// 32-bit signed jump delta, measured from the start of this operand.
    JumpOffset,
}

impl OperandType {
    /// Encoded size of the operand, in bytes.
    pub fn size(self) -> usize {
        match self {
            OperandType::Imm1 => 1,
            OperandType::Imm2 | OperandType::UImm16 | OperandType::FunctionId => 2,
            OperandType::Local
            | OperandType::Imm4
            | OperandType::FImm4
            | OperandType::UImm32
            | OperandType::JumpOffset => 4,
            OperandType::Imm8 | OperandType::FImm8 => 8,
        }
    }
}

macro_rules! define_bytecodes {
    ($($name:ident => [$($operand:ident),* $(,)?]),+ $(,)?) => {
        /// Every bytecode instruction.
        #[repr(u16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[allow(clippy::enum_variant_names)]
        pub enum Bytecode {
            $($name),+
        }

        impl Bytecode {
            const ALL: &'static [Bytecode] = &[$(Bytecode::$name),+];

            /// Total number of opcodes.
            pub fn count() -> usize {
                Self::ALL.len()
            }

            /// The opcode's numeric encoding.
            pub fn to_u16(self) -> u16 {
                self as u16
            }

            /// Decode an opcode from its numeric encoding.
            pub fn from_u16(value: u16) -> Option<Bytecode> {
                Self::ALL.get(value as usize).copied()
            }

            /// The opcode's mnemonic.
            pub fn name(self) -> &'static str {
                match self {
                    $(Bytecode::$name => stringify!($name)),+
                }
            }

            /// The fixed operand layout. Instructions with trailing
            /// variable-length operand lists ([`Bytecode::Call`]) list only
            /// their fixed prefix here.
            pub fn operands(self) -> &'static [OperandType] {
                match self {
                    $(Bytecode::$name => &[$(OperandType::$operand),*]),+
                }
            }
        }
    };
}

define_bytecodes! {
    // -----------------------------------------------------------------
    // Control flow
    // -----------------------------------------------------------------
    Jump => [JumpOffset],
    JumpIfTrue => [Local, JumpOffset],
    JumpIfFalse => [Local, JumpOffset],
    Return => [],
    // Call: function id, argument count, then `argc` encoded locals.
    Call => [FunctionId, UImm16],

    // -----------------------------------------------------------------
    // Memory: dereference, assignment, address computation
    // -----------------------------------------------------------------
    Deref1 => [Local, Local],
    Deref2 => [Local, Local],
    Deref4 => [Local, Local],
    Deref8 => [Local, Local],
    DerefN => [Local, Local, UImm32],
    Assign1 => [Local, Local],
    Assign2 => [Local, Local],
    Assign4 => [Local, Local],
    Assign8 => [Local, Local],
    AssignImm1 => [Local, Imm1],
    AssignImm2 => [Local, Imm2],
    AssignImm4 => [Local, Imm4],
    AssignImm8 => [Local, Imm8],
    AssignImm4F => [Local, FImm4],
    AssignImm8F => [Local, FImm8],
    AssignN => [Local, Local, UImm32],
    Lea => [Local, Local, UImm32],
    LeaScaled => [Local, Local, Local, UImm32, UImm32],

    // -----------------------------------------------------------------
    // Primitive arithmetic, one variant per type
    // -----------------------------------------------------------------
    AddI8 => [Local, Local, Local],
    AddI16 => [Local, Local, Local],
    AddI32 => [Local, Local, Local],
    AddI64 => [Local, Local, Local],
    AddU8 => [Local, Local, Local],
    AddU16 => [Local, Local, Local],
    AddU32 => [Local, Local, Local],
    AddU64 => [Local, Local, Local],
    AddF32 => [Local, Local, Local],
    AddF64 => [Local, Local, Local],
    SubI8 => [Local, Local, Local],
    SubI16 => [Local, Local, Local],
    SubI32 => [Local, Local, Local],
    SubI64 => [Local, Local, Local],
    SubU8 => [Local, Local, Local],
    SubU16 => [Local, Local, Local],
    SubU32 => [Local, Local, Local],
    SubU64 => [Local, Local, Local],
    SubF32 => [Local, Local, Local],
    SubF64 => [Local, Local, Local],
    MulI8 => [Local, Local, Local],
    MulI16 => [Local, Local, Local],
    MulI32 => [Local, Local, Local],
    MulI64 => [Local, Local, Local],
    MulU8 => [Local, Local, Local],
    MulU16 => [Local, Local, Local],
    MulU32 => [Local, Local, Local],
    MulU64 => [Local, Local, Local],
    MulF32 => [Local, Local, Local],
    MulF64 => [Local, Local, Local],
    DivI8 => [Local, Local, Local],
    DivI16 => [Local, Local, Local],
    DivI32 => [Local, Local, Local],
    DivI64 => [Local, Local, Local],
    DivU8 => [Local, Local, Local],
    DivU16 => [Local, Local, Local],
    DivU32 => [Local, Local, Local],
    DivU64 => [Local, Local, Local],
    DivF32 => [Local, Local, Local],
    DivF64 => [Local, Local, Local],
    RemI8 => [Local, Local, Local],
    RemI16 => [Local, Local, Local],
    RemI32 => [Local, Local, Local],
    RemI64 => [Local, Local, Local],
    RemU8 => [Local, Local, Local],
    RemU16 => [Local, Local, Local],
    RemU32 => [Local, Local, Local],
    RemU64 => [Local, Local, Local],
    RemF32 => [Local, Local, Local],
    RemF64 => [Local, Local, Local],
    NegI8 => [Local, Local],
    NegI16 => [Local, Local],
    NegI32 => [Local, Local],
    NegI64 => [Local, Local],
    NegF32 => [Local, Local],
    NegF64 => [Local, Local],

    // -----------------------------------------------------------------
    // Primitive comparisons; destination is a one-byte bool
    // -----------------------------------------------------------------
    EqI8 => [Local, Local, Local],
    EqI16 => [Local, Local, Local],
    EqI32 => [Local, Local, Local],
    EqI64 => [Local, Local, Local],
    EqU8 => [Local, Local, Local],
    EqU16 => [Local, Local, Local],
    EqU32 => [Local, Local, Local],
    EqU64 => [Local, Local, Local],
    EqF32 => [Local, Local, Local],
    EqF64 => [Local, Local, Local],
    NeI8 => [Local, Local, Local],
    NeI16 => [Local, Local, Local],
    NeI32 => [Local, Local, Local],
    NeI64 => [Local, Local, Local],
    NeU8 => [Local, Local, Local],
    NeU16 => [Local, Local, Local],
    NeU32 => [Local, Local, Local],
    NeU64 => [Local, Local, Local],
    NeF32 => [Local, Local, Local],
    NeF64 => [Local, Local, Local],
    LtI8 => [Local, Local, Local],
    LtI16 => [Local, Local, Local],
    LtI32 => [Local, Local, Local],
    LtI64 => [Local, Local, Local],
    LtU8 => [Local, Local, Local],
    LtU16 => [Local, Local, Local],
    LtU32 => [Local, Local, Local],
    LtU64 => [Local, Local, Local],
    LtF32 => [Local, Local, Local],
    LtF64 => [Local, Local, Local],
    LeI8 => [Local, Local, Local],
    LeI16 => [Local, Local, Local],
    LeI32 => [Local, Local, Local],
    LeI64 => [Local, Local, Local],
    LeU8 => [Local, Local, Local],
    LeU16 => [Local, Local, Local],
    LeU32 => [Local, Local, Local],
    LeU64 => [Local, Local, Local],
    LeF32 => [Local, Local, Local],
    LeF64 => [Local, Local, Local],
    GtI8 => [Local, Local, Local],
    GtI16 => [Local, Local, Local],
    GtI32 => [Local, Local, Local],
    GtI64 => [Local, Local, Local],
    GtU8 => [Local, Local, Local],
    GtU16 => [Local, Local, Local],
    GtU32 => [Local, Local, Local],
    GtU64 => [Local, Local, Local],
    GtF32 => [Local, Local, Local],
    GtF64 => [Local, Local, Local],
    GeI8 => [Local, Local, Local],
    GeI16 => [Local, Local, Local],
    GeI32 => [Local, Local, Local],
    GeI64 => [Local, Local, Local],
    GeU8 => [Local, Local, Local],
    GeU16 => [Local, Local, Local],
    GeU32 => [Local, Local, Local],
    GeU64 => [Local, Local, Local],
    GeF32 => [Local, Local, Local],
    GeF64 => [Local, Local, Local],

    // -----------------------------------------------------------------
    // Bitwise operations on integer types
    // -----------------------------------------------------------------
    BitAndI8 => [Local, Local, Local],
    BitAndI16 => [Local, Local, Local],
    BitAndI32 => [Local, Local, Local],
    BitAndI64 => [Local, Local, Local],
    BitAndU8 => [Local, Local, Local],
    BitAndU16 => [Local, Local, Local],
    BitAndU32 => [Local, Local, Local],
    BitAndU64 => [Local, Local, Local],
    BitOrI8 => [Local, Local, Local],
    BitOrI16 => [Local, Local, Local],
    BitOrI32 => [Local, Local, Local],
    BitOrI64 => [Local, Local, Local],
    BitOrU8 => [Local, Local, Local],
    BitOrU16 => [Local, Local, Local],
    BitOrU32 => [Local, Local, Local],
    BitOrU64 => [Local, Local, Local],
    BitXorI8 => [Local, Local, Local],
    BitXorI16 => [Local, Local, Local],
    BitXorI32 => [Local, Local, Local],
    BitXorI64 => [Local, Local, Local],
    BitXorU8 => [Local, Local, Local],
    BitXorU16 => [Local, Local, Local],
    BitXorU32 => [Local, Local, Local],
    BitXorU64 => [Local, Local, Local],
    BitNegI8 => [Local, Local],
    BitNegI16 => [Local, Local],
    BitNegI32 => [Local, Local],
    BitNegI64 => [Local, Local],
    BitNegU8 => [Local, Local],
    BitNegU16 => [Local, Local],
    BitNegU32 => [Local, Local],
    BitNegU64 => [Local, Local],
    ShlI8 => [Local, Local, Local],
    ShlI16 => [Local, Local, Local],
    ShlI32 => [Local, Local, Local],
    ShlI64 => [Local, Local, Local],
    ShlU8 => [Local, Local, Local],
    ShlU16 => [Local, Local, Local],
    ShlU32 => [Local, Local, Local],
    ShlU64 => [Local, Local, Local],
    ShrI8 => [Local, Local, Local],
    ShrI16 => [Local, Local, Local],
    ShrI32 => [Local, Local, Local],
    ShrI64 => [Local, Local, Local],
    ShrU8 => [Local, Local, Local],
    ShrU16 => [Local, Local, Local],
    ShrU32 => [Local, Local, Local],
    ShrU64 => [Local, Local, Local],

    // Boolean negation and scalar conversions
    Not => [Local, Local],
    // dst, src, then source and destination primitive-type codes.
    IntCast => [Local, Local, Imm1, Imm1],
    FloatToDouble => [Local, Local],
    DoubleToFloat => [Local, Local],

    // -----------------------------------------------------------------
    // SQL value construction and collapse
    // -----------------------------------------------------------------
    BoolToSql => [Local, Local],
    IntToSql => [Local, Local],
    FloatToSql => [Local, Local],
    DateToSql => [Local, Local, Local, Local],
    // Destination StringVal, string-pool index.
    InitString => [Local, UImm32],
    ForceTruth => [Local, Local],

    // -----------------------------------------------------------------
    // NULL-aware SQL arithmetic
    // -----------------------------------------------------------------
    AddInteger => [Local, Local, Local],
    SubInteger => [Local, Local, Local],
    MulInteger => [Local, Local, Local],
    DivInteger => [Local, Local, Local],
    RemInteger => [Local, Local, Local],
    AddReal => [Local, Local, Local],
    SubReal => [Local, Local, Local],
    MulReal => [Local, Local, Local],
    DivReal => [Local, Local, Local],
    RemReal => [Local, Local, Local],

    // -----------------------------------------------------------------
    // NULL-aware SQL comparisons, producing SQL booleans
    // -----------------------------------------------------------------
    EqInteger => [Local, Local, Local],
    NeInteger => [Local, Local, Local],
    LtInteger => [Local, Local, Local],
    LeInteger => [Local, Local, Local],
    GtInteger => [Local, Local, Local],
    GeInteger => [Local, Local, Local],
    EqReal => [Local, Local, Local],
    NeReal => [Local, Local, Local],
    LtReal => [Local, Local, Local],
    LeReal => [Local, Local, Local],
    GtReal => [Local, Local, Local],
    GeReal => [Local, Local, Local],
    EqString => [Local, Local, Local],
    NeString => [Local, Local, Local],
    LtString => [Local, Local, Local],
    LeString => [Local, Local, Local],
    GtString => [Local, Local, Local],
    GeString => [Local, Local, Local],
    EqDate => [Local, Local, Local],
    NeDate => [Local, Local, Local],
    LtDate => [Local, Local, Local],
    LeDate => [Local, Local, Local],
    GtDate => [Local, Local, Local],
    GeDate => [Local, Local, Local],
    EqTimestamp => [Local, Local, Local],
    NeTimestamp => [Local, Local, Local],
    LtTimestamp => [Local, Local, Local],
    LeTimestamp => [Local, Local, Local],
    GtTimestamp => [Local, Local, Local],
    GeTimestamp => [Local, Local, Local],

    // NULL construction: dst, value byte size, byte offset of the null flag.
    InitSqlNull => [Local, UImm32, UImm32],
    // NULL tests: dst, value, byte offset of the value's null flag.
    ValIsNull => [Local, Local, UImm32],
    ValIsNotNull => [Local, Local, UImm32],

    // String matching and numeric helpers over SQL values
    Like => [Local, Local, Local],
    NotLike => [Local, Local, Local],
    Acos => [Local, Local],
    Asin => [Local, Local],
    Atan => [Local, Local],
    Atan2 => [Local, Local, Local],
    Cos => [Local, Local],
    Cot => [Local, Local],
    Sin => [Local, Local],
    Tan => [Local, Local],

    // Hashing SQL values
    HashInt => [Local, Local],
    HashReal => [Local, Local],
    HashString => [Local, Local],
    HashDate => [Local, Local],
    HashTimestamp => [Local, Local],
    HashCombine => [Local, Local],

    // -----------------------------------------------------------------
    // Table scans
    // -----------------------------------------------------------------
    TableVectorIteratorInit => [Local, Local, UImm16],
    TableVectorIteratorAdvance => [Local, Local],
    TableVectorIteratorGetVpi => [Local, Local],
    TableVectorIteratorClose => [Local],
    ParallelScanTable => [UImm16, Local, Local, FunctionId],

    // -----------------------------------------------------------------
    // Vector projection iterator access
    // -----------------------------------------------------------------
    VpiIsFiltered => [Local, Local],
    VpiHasNext => [Local, Local],
    VpiAdvance => [Local],
    VpiMatch => [Local, Local],
    VpiReset => [Local],
    VpiGetBool => [Local, Local, UImm16],
    VpiGetTinyInt => [Local, Local, UImm16],
    VpiGetSmallInt => [Local, Local, UImm16],
    VpiGetInt => [Local, Local, UImm16],
    VpiGetBigInt => [Local, Local, UImm16],
    VpiGetReal => [Local, Local, UImm16],
    VpiGetDouble => [Local, Local, UImm16],
    VpiGetDate => [Local, Local, UImm16],
    VpiGetString => [Local, Local, UImm16],
    VpiGetIntNull => [Local, Local, UImm16],
    VpiGetBigIntNull => [Local, Local, UImm16],
    VpiGetRealNull => [Local, Local, UImm16],
    VpiGetDoubleNull => [Local, Local, UImm16],
    VpiGetDateNull => [Local, Local, UImm16],
    VpiGetStringNull => [Local, Local, UImm16],
    VpiSetInt => [Local, Local, UImm16],
    VpiSetBigInt => [Local, Local, UImm16],
    VpiSetReal => [Local, Local, UImm16],
    VpiSetDouble => [Local, Local, UImm16],
    VpiSetDate => [Local, Local, UImm16],
    VpiSetString => [Local, Local, UImm16],

    // -----------------------------------------------------------------
    // Filter manager
    // -----------------------------------------------------------------
    FilterManagerInit => [Local],
    FilterManagerStartNewClause => [Local],
    FilterManagerInsertClauseTerm => [Local, FunctionId],
    FilterManagerRunFilters => [Local, Local],
    FilterManagerFree => [Local],

    // -----------------------------------------------------------------
    // Aggregation hash table
    // -----------------------------------------------------------------
    AggregationHashTableInit => [Local, Local, Local],
    AggregationHashTableAllocTuple => [Local, Local, Local],
    AggregationHashTableAllocTuplePartitioned => [Local, Local, Local],
    AggregationHashTableLookup => [Local, Local, Local, FunctionId, Local],
    AggregationHashTableProcessBatch => [Local, Local, UImm16, Local, FunctionId, FunctionId, Local],
    AggregationHashTableTransferPartitions => [Local, Local, Local, FunctionId],
    AggregationHashTableParallelPartitionedScan => [Local, Local, Local, FunctionId],
    AggregationHashTableFree => [Local],
    AggregationHashTableIteratorInit => [Local, Local],
    AggregationHashTableIteratorHasNext => [Local, Local],
    AggregationHashTableIteratorNext => [Local],
    AggregationHashTableIteratorGetRow => [Local, Local],
    AggregationHashTableIteratorFree => [Local],
    AggregationOverflowPartitionIteratorHasNext => [Local, Local],
    AggregationOverflowPartitionIteratorNext => [Local],
    AggregationOverflowPartitionIteratorGetHash => [Local, Local],
    AggregationOverflowPartitionIteratorGetRow => [Local, Local],

    // -----------------------------------------------------------------
    // Join hash table
    // -----------------------------------------------------------------
    JoinHashTableInit => [Local, Local, Local],
    JoinHashTableAllocTuple => [Local, Local, Local],
    JoinHashTableBuild => [Local],
    JoinHashTableBuildParallel => [Local, Local, Local],
    JoinHashTableLookup => [Local, Local, Local],
    JoinHashTableFree => [Local],
    HashTableEntryIteratorHasNext => [Local, Local],
    HashTableEntryIteratorGetRow => [Local, Local],

    // -----------------------------------------------------------------
    // Sorter
    // -----------------------------------------------------------------
    SorterInit => [Local, Local, FunctionId, Local],
    SorterAllocTuple => [Local, Local],
    SorterAllocTupleTopK => [Local, Local, Local],
    SorterAllocTupleTopKFinish => [Local, Local],
    SorterSort => [Local],
    SorterSortParallel => [Local, Local, Local],
    SorterSortTopKParallel => [Local, Local, Local, Local],
    SorterFree => [Local],
    SorterIteratorInit => [Local, Local],
    SorterIteratorHasNext => [Local, Local],
    SorterIteratorNext => [Local],
    SorterIteratorSkipRows => [Local, Local],
    SorterIteratorGetRow => [Local, Local],
    SorterIteratorFree => [Local],

    // -----------------------------------------------------------------
    // Thread states, parallel glue, output
    // -----------------------------------------------------------------
    ExecutionContextGetThreadStateContainer => [Local, Local],
    ThreadStateContainerReset => [Local, Local, FunctionId, FunctionId, Local],
    ThreadStateContainerIterate => [Local, Local, FunctionId],
    ThreadStateContainerClear => [Local],
    ThreadStateContainerAccessCurrentThreadState => [Local, Local],
    ResultBufferAllocOutputRow => [Local, Local],
    ResultBufferFinalize => [Local],
}

/// Primitive-type codes carried by [`Bytecode::IntCast`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PrimTypeCode {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
}

impl PrimTypeCode {
    pub fn from_u8(value: u8) -> Option<PrimTypeCode> {
        Some(match value {
            0 => PrimTypeCode::I8,
            1 => PrimTypeCode::I16,
            2 => PrimTypeCode::I32,
            3 => PrimTypeCode::I64,
            4 => PrimTypeCode::U8,
            5 => PrimTypeCode::U16,
            6 => PrimTypeCode::U32,
            7 => PrimTypeCode::U64,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_encoding() {
        for code in [
            Bytecode::Jump,
            Bytecode::AddI32,
            Bytecode::GeTimestamp,
            Bytecode::SorterIteratorFree,
            Bytecode::ResultBufferFinalize,
        ] {
            assert_eq!(Bytecode::from_u16(code.to_u16()), Some(code));
        }
        assert_eq!(Bytecode::from_u16(u16::MAX), None);
    }

    #[test]
    fn test_operand_layouts() {
        assert_eq!(Bytecode::Jump.operands(), &[OperandType::JumpOffset]);
        assert_eq!(
            Bytecode::AddI64.operands(),
            &[OperandType::Local, OperandType::Local, OperandType::Local]
        );
        assert_eq!(
            Bytecode::VpiGetInt.operands(),
            &[OperandType::Local, OperandType::Local, OperandType::UImm16]
        );
    }

    #[test]
    fn test_names() {
        assert_eq!(Bytecode::JumpIfFalse.name(), "JumpIfFalse");
        assert_eq!(Bytecode::AggregationHashTableInit.name(), "AggregationHashTableInit");
    }
}
