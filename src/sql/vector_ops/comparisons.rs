//! Vectorized selection kernels.
//!
//! Each kernel takes an existing TID list and *restricts* it to the tuples
//! satisfying the predicate. NULLs are never selected. Either operand may be
//! a constant vector.

use std::cmp::Ordering;

use crate::sql::error::{ExecutionError, Result};
use crate::sql::functions::like;
use crate::sql::runtime_types::VarlenEntry;
use crate::sql::tuple_id_list::TupleIdList;
use crate::sql::vector::Vector;
use crate::sql::TypeId;

/// The comparison a selection applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl SelOp {
    #[inline]
    fn accepts(self, ord: Ordering) -> bool {
        match self {
            SelOp::Eq => ord == Ordering::Equal,
            SelOp::Ne => ord != Ordering::Equal,
            SelOp::Lt => ord == Ordering::Less,
            SelOp::Le => ord != Ordering::Greater,
            SelOp::Gt => ord == Ordering::Greater,
            SelOp::Ge => ord != Ordering::Less,
        }
    }
}

fn select_typed<T: Copy + PartialOrd>(
    left: &Vector,
    right: &Vector,
    op: SelOp,
    tid_list: &mut TupleIdList,
) {
    tid_list.filter(|tid| {
        if left.is_null(tid) || right.is_null(tid) {
            return false;
        }
        let (a, b) = (left.get::<T>(tid), right.get::<T>(tid));
        a.partial_cmp(&b).is_some_and(|ord| op.accepts(ord))
    });
}

/// Restrict `tid_list` to tuples where `left op right`.
pub fn select(left: &Vector, right: &Vector, op: SelOp, tid_list: &mut TupleIdList) -> Result<()> {
    debug_assert_eq!(left.type_id(), right.type_id());
    match left.type_id() {
        TypeId::Boolean => {
            select_typed::<u8>(left, right, op, tid_list);
        }
        TypeId::TinyInt => select_typed::<i8>(left, right, op, tid_list),
        TypeId::SmallInt => select_typed::<i16>(left, right, op, tid_list),
        TypeId::Integer | TypeId::Date => select_typed::<i32>(left, right, op, tid_list),
        TypeId::BigInt | TypeId::Timestamp => select_typed::<i64>(left, right, op, tid_list),
        TypeId::Float => select_typed::<f32>(left, right, op, tid_list),
        TypeId::Double => select_typed::<f64>(left, right, op, tid_list),
        TypeId::Hash => select_typed::<u64>(left, right, op, tid_list),
        TypeId::Pointer => select_typed::<usize>(left, right, op, tid_list),
        TypeId::Varchar => tid_list.filter(|tid| {
            if left.is_null(tid) || right.is_null(tid) {
                return false;
            }
            op.accepts(
                left.get::<VarlenEntry>(tid)
                    .cmp(&right.get::<VarlenEntry>(tid)),
            )
        }),
    }
    Ok(())
}

pub fn select_eq(left: &Vector, right: &Vector, tid_list: &mut TupleIdList) -> Result<()> {
    select(left, right, SelOp::Eq, tid_list)
}

pub fn select_ne(left: &Vector, right: &Vector, tid_list: &mut TupleIdList) -> Result<()> {
    select(left, right, SelOp::Ne, tid_list)
}

pub fn select_lt(left: &Vector, right: &Vector, tid_list: &mut TupleIdList) -> Result<()> {
    select(left, right, SelOp::Lt, tid_list)
}

pub fn select_le(left: &Vector, right: &Vector, tid_list: &mut TupleIdList) -> Result<()> {
    select(left, right, SelOp::Le, tid_list)
}

pub fn select_gt(left: &Vector, right: &Vector, tid_list: &mut TupleIdList) -> Result<()> {
    select(left, right, SelOp::Gt, tid_list)
}

pub fn select_ge(left: &Vector, right: &Vector, tid_list: &mut TupleIdList) -> Result<()> {
    select(left, right, SelOp::Ge, tid_list)
}

/// Restrict to tuples where `lower (≤|<) input (≤|<) upper` per the
/// inclusivity flags.
pub fn select_between(
    input: &Vector,
    lower: &Vector,
    upper: &Vector,
    lower_inclusive: bool,
    upper_inclusive: bool,
    tid_list: &mut TupleIdList,
) -> Result<()> {
    let lower_op = if lower_inclusive { SelOp::Ge } else { SelOp::Gt };
    let upper_op = if upper_inclusive { SelOp::Le } else { SelOp::Lt };
    select(input, lower, lower_op, tid_list)?;
    select(input, upper, upper_op, tid_list)
}

fn select_like_impl(
    input: &Vector,
    pattern: &Vector,
    want_match: bool,
    tid_list: &mut TupleIdList,
) -> Result<()> {
    if input.type_id() != TypeId::Varchar || pattern.type_id() != TypeId::Varchar {
        return Err(ExecutionError::NotImplemented(format!(
            "LIKE over {}",
            input.type_id()
        )));
    }
    tid_list.filter(|tid| {
        if input.is_null(tid) || pattern.is_null(tid) {
            return false;
        }
        let matched = like(
            input.get::<VarlenEntry>(tid).as_bytes(),
            pattern.get::<VarlenEntry>(tid).as_bytes(),
            b'\\',
        );
        matched == want_match
    });
    Ok(())
}

/// Restrict to tuples whose string matches its pattern.
pub fn select_like(input: &Vector, pattern: &Vector, tid_list: &mut TupleIdList) -> Result<()> {
    select_like_impl(input, pattern, true, tid_list)
}

/// Restrict to tuples whose string does NOT match its pattern. NULLs are
/// still never selected.
pub fn select_not_like(input: &Vector, pattern: &Vector, tid_list: &mut TupleIdList) -> Result<()> {
    select_like_impl(input, pattern, false, tid_list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::value::GenericValue;

    fn int_vector(values: &[Option<i32>]) -> Vector {
        let mut v = Vector::new(TypeId::Integer);
        v.set_size(values.len());
        for (i, value) in values.iter().enumerate() {
            match value {
                Some(x) => v.set::<i32>(i, *x),
                None => v.set_null(i, true),
            }
        }
        v
    }

    fn full_list(n: usize) -> TupleIdList {
        let mut list = TupleIdList::new(n);
        list.add_all();
        list
    }

    #[test]
    fn test_select_less_than_constant_skips_nulls() {
        // a = [NULL, 1, 6, NULL, 4, 5] vs constant 2.
        let a = int_vector(&[None, Some(1), Some(6), None, Some(4), Some(5)]);
        let two = Vector::constant(&GenericValue::Integer(Some(2)), 6);
        let mut list = full_list(6);
        select_lt(&a, &two, &mut list).expect("select");
        assert_eq!(list.to_vec(), vec![1]);
    }

    #[test]
    fn test_select_equal_no_matches() {
        let a = int_vector(&[None, Some(1), Some(6), None, Some(4), Some(5)]);
        let two = Vector::constant(&GenericValue::Integer(Some(2)), 6);
        let mut list = full_list(6);
        select_eq(&a, &two, &mut list).expect("select");
        assert!(list.is_empty());
    }

    #[test]
    fn test_selection_restricts_existing_list() {
        let a = int_vector(&[Some(0), Some(1), Some(2), Some(3)]);
        let c = Vector::constant(&GenericValue::Integer(Some(2)), 4);
        let mut list = TupleIdList::new(4);
        list.add(0);
        list.add(3);
        // Only tuples already in the list are considered.
        select_ge(&a, &c, &mut list).expect("select");
        assert_eq!(list.to_vec(), vec![3]);
    }

    #[test]
    fn test_vector_vector_comparison() {
        let a = int_vector(&[Some(1), Some(5), Some(3)]);
        let b = int_vector(&[Some(2), Some(5), Some(1)]);
        let mut list = full_list(3);
        select_le(&a, &b, &mut list).expect("select");
        assert_eq!(list.to_vec(), vec![0, 1]);
    }

    #[test]
    fn test_between() {
        let a = int_vector(&[Some(1), Some(2), Some(3), Some(4), Some(5)]);
        let lo = Vector::constant(&GenericValue::Integer(Some(2)), 5);
        let hi = Vector::constant(&GenericValue::Integer(Some(4)), 5);
        let mut list = full_list(5);
        select_between(&a, &lo, &hi, true, false, &mut list).expect("select");
        assert_eq!(list.to_vec(), vec![1, 2]);
    }

    #[test]
    fn test_select_like() {
        let mut input = Vector::new(TypeId::Varchar);
        input.set_size(3);
        input.set_string(0, b"apple");
        input.set_string(1, b"banana");
        input.set_null(2, true);
        let pattern = Vector::constant(&GenericValue::Varchar(Some("a%".to_string())), 3);
        let mut list = full_list(3);
        select_like(&input, &pattern, &mut list).expect("select");
        assert_eq!(list.to_vec(), vec![0]);

        let mut list = full_list(3);
        select_not_like(&input, &pattern, &mut list).expect("select");
        assert_eq!(list.to_vec(), vec![1]);
    }

    #[test]
    fn test_varchar_ordering() {
        let mut input = Vector::new(TypeId::Varchar);
        input.set_size(2);
        input.set_string(0, b"abc");
        input.set_string(1, b"abd");
        let needle = Vector::constant(&GenericValue::Varchar(Some("abc".to_string())), 2);
        let mut list = full_list(2);
        select_gt(&input, &needle, &mut list).expect("select");
        assert_eq!(list.to_vec(), vec![1]);
    }
}
