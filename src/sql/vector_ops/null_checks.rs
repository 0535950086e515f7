//! NULL-check selections.

use crate::sql::tuple_id_list::TupleIdList;
use crate::sql::vector::Vector;

/// Restrict `tid_list` to tuples that are NULL in `input`.
pub fn is_null(input: &Vector, tid_list: &mut TupleIdList) {
    tid_list.filter(|tid| input.is_null(tid));
}

/// Restrict `tid_list` to tuples that are NOT NULL in `input`.
pub fn is_not_null(input: &Vector, tid_list: &mut TupleIdList) {
    tid_list.filter(|tid| !input.is_null(tid));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::TypeId;

    #[test]
    fn test_null_checks_partition_the_list() {
        let mut v = Vector::new(TypeId::Integer);
        v.set_size(4);
        v.set::<i32>(0, 1);
        v.set_null(1, true);
        v.set::<i32>(2, 3);
        v.set_null(3, true);

        let mut nulls = TupleIdList::new(4);
        nulls.add_all();
        is_null(&v, &mut nulls);
        assert_eq!(nulls.to_vec(), vec![1, 3]);

        let mut non_nulls = TupleIdList::new(4);
        non_nulls.add_all();
        is_not_null(&v, &mut non_nulls);
        assert_eq!(non_nulls.to_vec(), vec![0, 2]);
    }
}
