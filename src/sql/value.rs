//! SQL runtime values.
//!
//! Two value representations live here. The `*Val` structs are the
//! `(payload, is_null)` pairs that generated TPL code manipulates in stack
//! frames; they are `#[repr(C)]` because the bytecode machine addresses them
//! through raw frame pointers. [`GenericValue`] is the type-erased owned
//! value used by the vector kernels for constants, fills, and row rendering.

use super::runtime_types::{Date, Timestamp, VarlenEntry};
use super::TypeId;

/// A SQL boolean, with three-valued logic collapse.
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C)]
pub struct BoolVal {
    pub value: bool,
    pub is_null: bool,
}

impl BoolVal {
    pub fn new(value: bool) -> Self {
        BoolVal {
            value,
            is_null: false,
        }
    }

    pub fn null() -> Self {
        BoolVal {
            value: false,
            is_null: true,
        }
    }

    /// Collapse to a native bool: NULL and false both yield false.
    pub fn force_truth(self) -> bool {
        !self.is_null && self.value
    }
}

/// A SQL integer (64-bit payload).
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C)]
pub struct Integer {
    pub value: i64,
    pub is_null: bool,
}

impl Integer {
    pub fn new(value: i64) -> Self {
        Integer {
            value,
            is_null: false,
        }
    }

    pub fn null() -> Self {
        Integer {
            value: 0,
            is_null: true,
        }
    }
}

/// A SQL real (64-bit float payload).
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C)]
pub struct Real {
    pub value: f64,
    pub is_null: bool,
}

impl Real {
    pub fn new(value: f64) -> Self {
        Real {
            value,
            is_null: false,
        }
    }

    pub fn null() -> Self {
        Real {
            value: 0.0,
            is_null: true,
        }
    }
}

/// A SQL fixed-point decimal. The payload is a scaled 128-bit integer.
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C)]
pub struct DecimalVal {
    pub value: i128,
    pub precision: u32,
    pub scale: u32,
    pub is_null: bool,
}

impl DecimalVal {
    pub fn new(value: i128, precision: u32, scale: u32) -> Self {
        DecimalVal {
            value,
            precision,
            scale,
            is_null: false,
        }
    }

    pub fn null() -> Self {
        DecimalVal {
            value: 0,
            precision: 0,
            scale: 0,
            is_null: true,
        }
    }
}

/// A SQL string value.
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C)]
pub struct StringVal {
    pub value: VarlenEntry,
    pub is_null: bool,
}

impl StringVal {
    pub fn new(value: VarlenEntry) -> Self {
        StringVal {
            value,
            is_null: false,
        }
    }

    pub fn null() -> Self {
        StringVal {
            value: VarlenEntry::empty(),
            is_null: true,
        }
    }
}

/// A SQL date value.
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C)]
pub struct DateVal {
    pub value: Date,
    pub is_null: bool,
}

impl DateVal {
    pub fn new(value: Date) -> Self {
        DateVal {
            value,
            is_null: false,
        }
    }

    pub fn null() -> Self {
        DateVal {
            value: Date::from_julian(0),
            is_null: true,
        }
    }
}

/// A SQL timestamp value.
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C)]
pub struct TimestampVal {
    pub value: Timestamp,
    pub is_null: bool,
}

impl TimestampVal {
    pub fn new(value: Timestamp) -> Self {
        TimestampVal {
            value,
            is_null: false,
        }
    }

    pub fn null() -> Self {
        TimestampVal {
            value: Timestamp::from_micros(0),
            is_null: true,
        }
    }
}

/// A type-erased, owned SQL value. `None` payloads are SQL NULL.
#[derive(Debug, Clone, PartialEq)]
pub enum GenericValue {
    Boolean(Option<bool>),
    TinyInt(Option<i8>),
    SmallInt(Option<i16>),
    Integer(Option<i32>),
    BigInt(Option<i64>),
    Float(Option<f32>),
    Double(Option<f64>),
    Date(Option<Date>),
    Timestamp(Option<Timestamp>),
    Varchar(Option<String>),
    Hash(Option<u64>),
    Pointer(Option<usize>),
}

impl GenericValue {
    pub fn type_id(&self) -> TypeId {
        match self {
            GenericValue::Boolean(_) => TypeId::Boolean,
            GenericValue::TinyInt(_) => TypeId::TinyInt,
            GenericValue::SmallInt(_) => TypeId::SmallInt,
            GenericValue::Integer(_) => TypeId::Integer,
            GenericValue::BigInt(_) => TypeId::BigInt,
            GenericValue::Float(_) => TypeId::Float,
            GenericValue::Double(_) => TypeId::Double,
            GenericValue::Date(_) => TypeId::Date,
            GenericValue::Timestamp(_) => TypeId::Timestamp,
            GenericValue::Varchar(_) => TypeId::Varchar,
            GenericValue::Hash(_) => TypeId::Hash,
            GenericValue::Pointer(_) => TypeId::Pointer,
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            GenericValue::Boolean(v) => v.is_none(),
            GenericValue::TinyInt(v) => v.is_none(),
            GenericValue::SmallInt(v) => v.is_none(),
            GenericValue::Integer(v) => v.is_none(),
            GenericValue::BigInt(v) => v.is_none(),
            GenericValue::Float(v) => v.is_none(),
            GenericValue::Double(v) => v.is_none(),
            GenericValue::Date(v) => v.is_none(),
            GenericValue::Timestamp(v) => v.is_none(),
            GenericValue::Varchar(v) => v.is_none(),
            GenericValue::Hash(v) => v.is_none(),
            GenericValue::Pointer(v) => v.is_none(),
        }
    }

    /// The NULL of a given type.
    pub fn null(type_id: TypeId) -> GenericValue {
        match type_id {
            TypeId::Boolean => GenericValue::Boolean(None),
            TypeId::TinyInt => GenericValue::TinyInt(None),
            TypeId::SmallInt => GenericValue::SmallInt(None),
            TypeId::Integer => GenericValue::Integer(None),
            TypeId::BigInt => GenericValue::BigInt(None),
            TypeId::Float => GenericValue::Float(None),
            TypeId::Double => GenericValue::Double(None),
            TypeId::Date => GenericValue::Date(None),
            TypeId::Timestamp => GenericValue::Timestamp(None),
            TypeId::Varchar => GenericValue::Varchar(None),
            TypeId::Hash => GenericValue::Hash(None),
            TypeId::Pointer => GenericValue::Pointer(None),
        }
    }
}

impl std::fmt::Display for GenericValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        macro_rules! show {
            ($v:expr) => {
                match $v {
                    Some(v) => write!(f, "{v}"),
                    None => write!(f, "NULL"),
                }
            };
        }
        match self {
            GenericValue::Boolean(v) => show!(v),
            GenericValue::TinyInt(v) => show!(v),
            GenericValue::SmallInt(v) => show!(v),
            GenericValue::Integer(v) => show!(v),
            GenericValue::BigInt(v) => show!(v),
            GenericValue::Float(v) => show!(v),
            GenericValue::Double(v) => show!(v),
            GenericValue::Date(v) => show!(v),
            GenericValue::Timestamp(v) => show!(v),
            GenericValue::Varchar(v) => match v {
                Some(v) => write!(f, "'{v}'"),
                None => write!(f, "NULL"),
            },
            GenericValue::Hash(v) => show!(v),
            GenericValue::Pointer(v) => match v {
                Some(v) => write!(f, "{v:#x}"),
                None => write!(f, "NULL"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_force_truth_table() {
        assert!(!BoolVal::new(false).force_truth());
        assert!(BoolVal::new(true).force_truth());
        assert!(!BoolVal::null().force_truth());
    }

    #[test]
    fn test_generic_value_nullness() {
        assert!(GenericValue::Integer(None).is_null());
        assert!(!GenericValue::Integer(Some(7)).is_null());
        assert_eq!(GenericValue::null(TypeId::Double), GenericValue::Double(None));
    }

    #[test]
    fn test_display() {
        assert_eq!(GenericValue::Integer(Some(42)).to_string(), "42");
        assert_eq!(GenericValue::Integer(None).to_string(), "NULL");
        assert_eq!(
            GenericValue::Varchar(Some("hi".to_string())).to_string(),
            "'hi'"
        );
    }
}
