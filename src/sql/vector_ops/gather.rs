//! Gather and fused gather+select kernels.
//!
//! These are the probe-side workhorses of the join: a pointer vector holds
//! hash-table entry payload addresses, and the kernels read a typed value at
//! `ptr + byte_offset` for every active tuple, either materializing it
//! (gather) or comparing it against a probe column and restricting the TID
//! list in one pass (gather+select).

use super::comparisons::SelOp;
use super::exec;
use crate::sql::error::Result;
use crate::sql::runtime_types::VarlenEntry;
use crate::sql::tuple_id_list::TupleIdList;
use crate::sql::vector::Vector;
use crate::sql::TypeId;

#[inline]
unsafe fn read_at<T: Copy>(ptr: usize, offset: usize) -> T {
    ((ptr + offset) as *const T).read_unaligned()
}

/// Dereference each active pointer and read the target-typed value at
/// `ptr + byte_offset` into `result`. NULL (zero) pointers set result-NULL.
pub fn gather(pointers: &Vector, result: &mut Vector, byte_offset: usize) -> Result<()> {
    debug_assert_eq!(pointers.type_id(), TypeId::Pointer);
    super::match_shape(pointers, result);

    macro_rules! gather_typed {
        ($ty:ty) => {
            exec(pointers, |i| {
                let ptr = pointers.get::<usize>(i);
                if ptr == 0 || pointers.is_null(i) {
                    result.set_null(i, true);
                } else {
                    result.set_null(i, false);
                    result.set::<$ty>(i, unsafe { read_at::<$ty>(ptr, byte_offset) });
                }
            })
        };
    }

    match result.type_id() {
        TypeId::Boolean | TypeId::TinyInt => gather_typed!(i8),
        TypeId::SmallInt => gather_typed!(i16),
        TypeId::Integer | TypeId::Date => gather_typed!(i32),
        TypeId::BigInt | TypeId::Timestamp => gather_typed!(i64),
        TypeId::Float => gather_typed!(f32),
        TypeId::Double => gather_typed!(f64),
        TypeId::Hash => gather_typed!(u64),
        TypeId::Pointer => gather_typed!(usize),
        TypeId::Varchar => gather_typed!(VarlenEntry),
    }
    Ok(())
}

fn gather_select_typed<T: Copy + PartialOrd>(
    input: &Vector,
    pointers: &Vector,
    byte_offset: usize,
    op: SelOp,
    tid_list: &mut TupleIdList,
) {
    tid_list.filter(|tid| {
        if input.is_null(tid) {
            return false;
        }
        let ptr = pointers.get::<usize>(tid);
        if ptr == 0 {
            return false;
        }
        let stored = unsafe { read_at::<T>(ptr, byte_offset) };
        let probe = input.get::<T>(tid);
        probe
            .partial_cmp(&stored)
            .is_some_and(|ord| match op {
                SelOp::Eq => ord == std::cmp::Ordering::Equal,
                SelOp::Ne => ord != std::cmp::Ordering::Equal,
                SelOp::Lt => ord == std::cmp::Ordering::Less,
                SelOp::Le => ord != std::cmp::Ordering::Greater,
                SelOp::Gt => ord == std::cmp::Ordering::Greater,
                SelOp::Ge => ord != std::cmp::Ordering::Less,
            })
    });
}

/// Fused gather+compare: restrict `tid_list` to tuples where
/// `input[tid] op *(pointers[tid] + byte_offset)`.
pub fn gather_and_select(
    input: &Vector,
    pointers: &Vector,
    byte_offset: usize,
    op: SelOp,
    tid_list: &mut TupleIdList,
) -> Result<()> {
    debug_assert_eq!(pointers.type_id(), TypeId::Pointer);
    match input.type_id() {
        TypeId::Boolean | TypeId::TinyInt => {
            gather_select_typed::<i8>(input, pointers, byte_offset, op, tid_list);
        }
        TypeId::SmallInt => gather_select_typed::<i16>(input, pointers, byte_offset, op, tid_list),
        TypeId::Integer | TypeId::Date => {
            gather_select_typed::<i32>(input, pointers, byte_offset, op, tid_list);
        }
        TypeId::BigInt | TypeId::Timestamp => {
            gather_select_typed::<i64>(input, pointers, byte_offset, op, tid_list);
        }
        TypeId::Float => gather_select_typed::<f32>(input, pointers, byte_offset, op, tid_list),
        TypeId::Double => gather_select_typed::<f64>(input, pointers, byte_offset, op, tid_list),
        TypeId::Hash => gather_select_typed::<u64>(input, pointers, byte_offset, op, tid_list),
        TypeId::Pointer => {
            gather_select_typed::<usize>(input, pointers, byte_offset, op, tid_list);
        }
        TypeId::Varchar => tid_list.filter(|tid| {
            if input.is_null(tid) {
                return false;
            }
            let ptr = pointers.get::<usize>(tid);
            if ptr == 0 {
                return false;
            }
            let stored = unsafe { read_at::<VarlenEntry>(ptr, byte_offset) };
            let probe = input.get::<VarlenEntry>(tid);
            match op {
                SelOp::Eq => probe == stored,
                SelOp::Ne => probe != stored,
                SelOp::Lt => probe < stored,
                SelOp::Le => probe <= stored,
                SelOp::Gt => probe > stored,
                SelOp::Ge => probe >= stored,
            }
        }),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_reads_through_pointers() {
        let rows: Vec<(u64, i64)> = vec![(0, 100), (0, 200), (0, 300)];
        let mut pointers = Vector::new(TypeId::Pointer);
        pointers.set_size(3);
        for (i, row) in rows.iter().enumerate() {
            pointers.set::<usize>(i, std::ptr::from_ref(row) as usize);
        }
        let mut out = Vector::new(TypeId::BigInt);
        gather(&pointers, &mut out, 8).expect("gather");
        assert_eq!(out.as_slice::<i64>(), &[100, 200, 300]);
    }

    #[test]
    fn test_gather_null_pointer_sets_null() {
        let mut pointers = Vector::new(TypeId::Pointer);
        pointers.set_size(1);
        pointers.set::<usize>(0, 0);
        let mut out = Vector::new(TypeId::BigInt);
        gather(&pointers, &mut out, 0).expect("gather");
        assert!(out.is_null(0));
    }

    #[test]
    fn test_gather_and_select_eq() {
        let stored: Vec<i32> = vec![7, 8, 7];
        let mut pointers = Vector::new(TypeId::Pointer);
        pointers.set_size(3);
        for (i, v) in stored.iter().enumerate() {
            pointers.set::<usize>(i, std::ptr::from_ref(v) as usize);
        }
        let mut probe = Vector::new(TypeId::Integer);
        probe.set_size(3);
        for i in 0..3 {
            probe.set::<i32>(i, 7);
        }
        let mut list = TupleIdList::new(3);
        list.add_all();
        gather_and_select(&probe, &pointers, 0, SelOp::Eq, &mut list).expect("select");
        assert_eq!(list.to_vec(), vec![0, 2]);
    }
}
