//! The vectorized SQL runtime.
//!
//! Everything below the bytecode machine lives here: column vectors and
//! tuple-id lists, the vector-operation kernels, table storage and scan
//! iterators, and the stateful operator kernels (join hash table,
//! aggregation hash table, sorter) with their parallel build paths.
//!
//! ## Batch shape
//!
//! Data flows through the runtime as [`VectorProjection`]s: ordered groups
//! of equal-size column [`Vector`]s sharing one optional [`TupleIdList`]
//! filter. Vectors hold at most [`DEFAULT_VECTOR_SIZE`] tuples.

pub mod aggregation_hash_table;
pub mod catalog;
pub mod error;
pub mod exec;
pub mod filter_manager;
pub mod functions;
pub mod join_hash_table;
pub mod join_probe;
pub mod projection;
pub mod runtime_types;
pub mod schema;
pub mod sorter;
pub mod table;
pub mod table_vector_iterator;
pub mod thread_state;
pub mod tuple_id_list;
pub mod value;
pub mod vector;
pub mod vector_ops;
pub mod vpi;

pub use aggregation_hash_table::{
    AggregationHashTable, AhtIterator, AhtOverflowPartitionIterator,
};
pub use catalog::Catalog;
pub use error::{ExecutionError, Result};
pub use filter_manager::FilterManager;
pub use join_hash_table::{HashTableEntry, HashTableEntryIterator, JoinHashTable};
pub use join_probe::{JoinHashTableVectorProbe, JoinType};
pub use projection::VectorProjection;
pub use runtime_types::{ConversionError, Date, Timestamp, VarlenEntry};
pub use schema::Schema;
pub use sorter::{Sorter, SorterIterator};
pub use table::Table;
pub use table_vector_iterator::TableVectorIterator;
pub use thread_state::ThreadStateContainer;
pub use tuple_id_list::TupleIdList;
pub use value::GenericValue;
pub use vector::Vector;
pub use vpi::VectorProjectionIterator;

/// The number of tuples in a full vector batch.
pub const DEFAULT_VECTOR_SIZE: usize = 2048;

/// Physical types a column vector can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeId {
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Float,
    Double,
    Date,
    Timestamp,
    Varchar,
    /// 64-bit hash values (internal).
    Hash,
    /// Raw pointers (internal, used by probes and gathers).
    Pointer,
}

impl TypeId {
    /// Size of one element of this type, in bytes.
    pub fn size(self) -> usize {
        match self {
            TypeId::Boolean | TypeId::TinyInt => 1,
            TypeId::SmallInt => 2,
            TypeId::Integer | TypeId::Float | TypeId::Date => 4,
            TypeId::BigInt
            | TypeId::Double
            | TypeId::Timestamp
            | TypeId::Hash
            | TypeId::Pointer => 8,
            TypeId::Varchar => std::mem::size_of::<VarlenEntry>(),
        }
    }

    /// True for types compared and hashed by numeric value.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            TypeId::TinyInt
                | TypeId::SmallInt
                | TypeId::Integer
                | TypeId::BigInt
                | TypeId::Float
                | TypeId::Double
        )
    }
}

impl std::fmt::Display for TypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TypeId::Boolean => "Boolean",
            TypeId::TinyInt => "TinyInt",
            TypeId::SmallInt => "SmallInt",
            TypeId::Integer => "Integer",
            TypeId::BigInt => "BigInt",
            TypeId::Float => "Float",
            TypeId::Double => "Double",
            TypeId::Date => "Date",
            TypeId::Timestamp => "Timestamp",
            TypeId::Varchar => "Varchar",
            TypeId::Hash => "Hash",
            TypeId::Pointer => "Pointer",
        };
        f.write_str(name)
    }
}
