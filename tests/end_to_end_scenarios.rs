//! The canonical end-to-end scenarios: overflow-flagged addition,
//! three-valued LIKE, constant selections, duplicate-key chain walks,
//! Top-K sorting, and date parsing.

use tellur::sql::functions::{add_overflow, like};
use tellur::sql::runtime_types::Date;
use tellur::sql::value::GenericValue;
use tellur::sql::{JoinHashTable, Sorter, TupleIdList, TypeId, Vector};
use tellur::sql::join_hash_table::HashTableEntryIterator;
use tellur::sql::vector_ops;
use tellur::util::hashing::hash_u64;

#[test]
fn integer_addition_with_overflow() {
    let (_, overflow) = add_overflow(i64::MAX - 1, 4);
    assert!(overflow, "i64::MAX - 1 + 4 must flag overflow");
    let (sum, overflow) = add_overflow(i64::MAX - 1, 1);
    assert!(!overflow);
    assert_eq!(sum, i64::MAX);
}

#[test]
fn three_valued_like() {
    // 'abc' LIKE 'a%' is true.
    assert!(like(b"abc", b"a%", b'\\'));

    // NULL LIKE 'a%' and 'abc' LIKE NULL are NULL at the SQL layer: the
    // vectorized kernel never selects tuples with a NULL operand.
    let mut input = Vector::new(TypeId::Varchar);
    input.set_size(3);
    input.set_string(0, b"abc");
    input.set_null(1, true);
    input.set_string(2, b"abc");
    let mut pattern = Vector::new(TypeId::Varchar);
    pattern.set_size(3);
    pattern.set_string(0, b"a%");
    pattern.set_string(1, b"a%");
    pattern.set_null(2, true);

    let mut list = TupleIdList::new(3);
    list.add_all();
    vector_ops::select_like(&input, &pattern, &mut list).expect("like");
    assert_eq!(list.to_vec(), vec![0]);
}

#[test]
fn vectorized_selection_on_integers() {
    // a = [NULL, 1, 6, NULL, 4, 5] against the constant 2.
    let mut a = Vector::new(TypeId::Integer);
    a.set_size(6);
    for (i, v) in [None, Some(1), Some(6), None, Some(4), Some(5)]
        .iter()
        .enumerate()
    {
        match v {
            Some(v) => a.set::<i32>(i, *v),
            None => a.set_null(i, true),
        }
    }
    let two = Vector::constant(&GenericValue::Integer(Some(2)), 6);

    let mut less = TupleIdList::new(6);
    less.add_all();
    vector_ops::select_lt(&a, &two, &mut less).expect("lt");
    assert_eq!(less.to_vec(), vec![1]);

    let mut equal = TupleIdList::new(6);
    equal.add_all();
    vector_ops::select_eq(&a, &two, &mut equal).expect("eq");
    assert!(equal.is_empty());
}

#[test]
fn chain_walk_over_500_duplicates() {
    let mut table = JoinHashTable::new(8);
    let hash = hash_u64(42);
    for i in 0..500i64 {
        let payload = table.alloc(hash);
        unsafe { payload.cast::<i64>().write_unaligned(i) };
    }
    table.build();

    let mut iter = HashTableEntryIterator::new();
    table.lookup_iter(hash, &mut iter);
    let mut visited = Vec::new();
    while iter.has_next() {
        let payload = iter.get_row();
        visited.push(unsafe { payload.cast::<i64>().read_unaligned() });
    }
    assert_eq!(visited.len(), 500, "probe must visit exactly 500 entries");
    visited.sort_unstable();
    assert_eq!(visited, (0..500).collect::<Vec<_>>());
}

#[test]
fn top_2_sort_over_five_rows() {
    let mut sorter = Sorter::new(
        Box::new(|l, r| {
            let a = unsafe { l.cast::<i64>().read_unaligned() };
            let b = unsafe { r.cast::<i64>().read_unaligned() };
            (a - b).clamp(-1, 1) as i32
        }),
        8,
    );
    for key in [3i64, 1, 4, 1, 5] {
        let row = sorter.alloc_input_tuple_top_k(2);
        unsafe { row.cast::<i64>().write_unaligned(key) };
        sorter.alloc_input_tuple_top_k_finish(2);
    }
    sorter.sort();
    let keys: Vec<i64> = sorter
        .tuples()
        .iter()
        .map(|&p| unsafe { p.cast::<i64>().read_unaligned() })
        .collect();
    assert_eq!(keys, vec![1, 1]);
}

#[test]
fn date_parsing() {
    let parsed = Date::from_str("2024-03-15").expect("valid date");
    assert_eq!(
        parsed,
        Date::from_ymd(2024, 3, 15).expect("valid components")
    );
    assert_eq!((parsed.year(), parsed.month(), parsed.day()), (2024, 3, 15));

    assert!(Date::from_str("2024-13-01").is_err());
}
