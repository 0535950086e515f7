//! Vector sort: produce an ascending permutation of the active tuples.

use crate::sql::runtime_types::VarlenEntry;
use crate::sql::vector::Vector;
use crate::sql::TypeId;

/// Write into `out_sel` the active TIDs of `input` ordered so the values
/// they index ascend. NULLs sort first. Returns the number of indexes
/// written.
pub fn sort_to_selection(input: &Vector, out_sel: &mut [u16]) -> usize {
    let mut tids = Vec::with_capacity(input.count());
    super::exec(input, |i| tids.push(i));

    macro_rules! sort_by_type {
        ($ty:ty) => {
            tids.sort_by(|&a, &b| {
                match (input.is_null(a), input.is_null(b)) {
                    (true, true) => std::cmp::Ordering::Equal,
                    (true, false) => std::cmp::Ordering::Less,
                    (false, true) => std::cmp::Ordering::Greater,
                    (false, false) => input
                        .get::<$ty>(a)
                        .partial_cmp(&input.get::<$ty>(b))
                        .unwrap_or(std::cmp::Ordering::Equal),
                }
            })
        };
    }

    match input.type_id() {
        TypeId::Boolean | TypeId::TinyInt => sort_by_type!(i8),
        TypeId::SmallInt => sort_by_type!(i16),
        TypeId::Integer | TypeId::Date => sort_by_type!(i32),
        TypeId::BigInt | TypeId::Timestamp => sort_by_type!(i64),
        TypeId::Float => sort_by_type!(f32),
        TypeId::Double => sort_by_type!(f64),
        TypeId::Hash => sort_by_type!(u64),
        TypeId::Pointer => sort_by_type!(usize),
        TypeId::Varchar => sort_by_type!(VarlenEntry),
    }

    for (k, &tid) in tids.iter().enumerate() {
        out_sel[k] = tid as u16;
    }
    tids.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_permutation() {
        let mut v = Vector::new(TypeId::Integer);
        v.set_size(5);
        for (i, val) in [30, 10, 50, 20, 40].iter().enumerate() {
            v.set::<i32>(i, *val);
        }
        let mut sel = [0u16; 5];
        let n = sort_to_selection(&v, &mut sel);
        assert_eq!(n, 5);
        assert_eq!(&sel[..n], &[1, 3, 0, 4, 2]);
    }

    #[test]
    fn test_nulls_sort_first() {
        let mut v = Vector::new(TypeId::Integer);
        v.set_size(3);
        v.set::<i32>(0, 5);
        v.set_null(1, true);
        v.set::<i32>(2, 1);
        let mut sel = [0u16; 3];
        sort_to_selection(&v, &mut sel);
        assert_eq!(sel[0], 1);
        assert_eq!(sel[1], 2);
        assert_eq!(sel[2], 0);
    }
}
