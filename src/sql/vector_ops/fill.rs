//! Fill and sequence-generation kernels.

use super::exec;
use crate::sql::error::{ExecutionError, Result};
use crate::sql::value::GenericValue;
use crate::sql::vector::Vector;
use crate::sql::TypeId;

/// Broadcast `value` into every active position of `vector`.
pub fn fill(vector: &mut Vector, value: &GenericValue) -> Result<()> {
    debug_assert_eq!(vector.type_id(), value.type_id());
    let mut tids = Vec::new();
    exec(vector, |i| tids.push(i));
    for tid in tids {
        vector.set_value(tid, value);
    }
    Ok(())
}

/// Set every active position of `vector` to NULL.
pub fn fill_null(vector: &mut Vector) {
    let mut tids = Vec::new();
    exec(vector, |i| tids.push(i));
    for tid in tids {
        vector.set_null(tid, true);
    }
}

/// Fill active positions with `start + tid * step`.
pub fn generate(vector: &mut Vector, start: i64, step: i64) -> Result<()> {
    let mut tids = Vec::new();
    exec(vector, |i| tids.push(i));
    match vector.type_id() {
        TypeId::TinyInt => {
            for tid in tids {
                vector.set::<i8>(tid, (start + tid as i64 * step) as i8);
            }
        }
        TypeId::SmallInt => {
            for tid in tids {
                vector.set::<i16>(tid, (start + tid as i64 * step) as i16);
            }
        }
        TypeId::Integer => {
            for tid in tids {
                vector.set::<i32>(tid, (start + tid as i64 * step) as i32);
            }
        }
        TypeId::BigInt => {
            for tid in tids {
                vector.set::<i64>(tid, start + tid as i64 * step);
            }
        }
        TypeId::Float => {
            for tid in tids {
                vector.set::<f32>(tid, (start + tid as i64 * step) as f32);
            }
        }
        TypeId::Double => {
            for tid in tids {
                vector.set::<f64>(tid, (start + tid as i64 * step) as f64);
            }
        }
        other => {
            return Err(ExecutionError::NotImplemented(format!(
                "generate over {other}"
            )))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::TupleIdList;

    #[test]
    fn test_fill() {
        let mut v = Vector::new(TypeId::Integer);
        v.set_size(4);
        fill(&mut v, &GenericValue::Integer(Some(9))).expect("fill");
        assert_eq!(v.as_slice::<i32>(), &[9, 9, 9, 9]);
    }

    #[test]
    fn test_fill_respects_filter() {
        let mut v = Vector::new(TypeId::Integer);
        v.set_size(4);
        let mut list = TupleIdList::new(4);
        list.add(1);
        list.add(3);
        v.set_filtered_tuple_id_list(&list);
        fill(&mut v, &GenericValue::Integer(Some(5))).expect("fill");
        assert_eq!(v.get::<i32>(1), 5);
        assert_eq!(v.get::<i32>(3), 5);
        assert_eq!(v.get::<i32>(0), 0);
    }

    #[test]
    fn test_fill_null() {
        let mut v = Vector::new(TypeId::BigInt);
        v.set_size(3);
        fill_null(&mut v);
        assert!(v.is_null(0) && v.is_null(1) && v.is_null(2));
    }

    #[test]
    fn test_generate() {
        let mut v = Vector::new(TypeId::BigInt);
        v.set_size(5);
        generate(&mut v, 10, 3).expect("generate");
        assert_eq!(v.as_slice::<i64>(), &[10, 13, 16, 19, 22]);
    }
}
