//! Dense copy of active elements.

use super::exec;
use crate::sql::runtime_types::VarlenEntry;
use crate::sql::vector::Vector;
use crate::sql::TypeId;

/// Copy only the *active* elements of `source` into `target`, densely
/// packed: afterwards `target.size() == source.count()` and target's null
/// mask mirrors the active elements' nullness. The target's filter is
/// cleared.
pub fn copy(source: &Vector, target: &mut Vector) {
    debug_assert_eq!(source.type_id(), target.type_id());
    let mut tids = Vec::with_capacity(source.count());
    exec(source, |i| tids.push(i));
    target.set_size(tids.len());

    match source.type_id() {
        TypeId::Varchar => {
            for (k, &tid) in tids.iter().enumerate() {
                if source.is_null(tid) {
                    target.set_null(k, true);
                } else {
                    target.set_null(k, false);
                    let entry = source.get::<VarlenEntry>(tid);
                    target.set_string(k, entry.as_bytes());
                }
            }
        }
        other => {
            let elem = other.size();
            for (k, &tid) in tids.iter().enumerate() {
                target.set_null(k, source.is_null(tid));
                // Untyped element copy; all fixed-size types move as bytes.
                match elem {
                    1 => {
                        let v = source.get::<u8>(tid);
                        target.set::<u8>(k, v);
                    }
                    2 => {
                        let v = source.get::<i16>(tid);
                        target.set::<i16>(k, v);
                    }
                    4 => {
                        let v = source.get::<i32>(tid);
                        target.set::<i32>(k, v);
                    }
                    _ => {
                        let v = source.get::<i64>(tid);
                        target.set::<i64>(k, v);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::TupleIdList;

    #[test]
    fn test_copy_compacts_filtered_elements() {
        let mut v = Vector::new(TypeId::Integer);
        v.set_size(5);
        for i in 0..5 {
            v.set::<i32>(i, i as i32 * 10);
        }
        v.set_null(3, true);
        let mut list = TupleIdList::new(5);
        list.add(1);
        list.add(3);
        list.add(4);
        v.set_filtered_tuple_id_list(&list);

        let mut out = Vector::new(TypeId::Integer);
        copy(&v, &mut out);
        assert_eq!(out.size(), 3);
        assert_eq!(out.get::<i32>(0), 10);
        assert!(out.is_null(1));
        assert_eq!(out.get::<i32>(2), 40);
    }
}
