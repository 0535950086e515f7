//! Property-based invariants (proptest) over the core data structures:
//! type interning, struct layout, jump patching, TID-list algebra and
//! representation conversions, kernel NULL propagation, and the sort laws.

use proptest::prelude::*;

use tellur::ast::{BuiltinKind, Field, StringInterner, TypeInterner};
use tellur::sql::value::GenericValue;
use tellur::sql::vector_ops;
use tellur::sql::{Sorter, TupleIdList, TypeId, Vector, DEFAULT_VECTOR_SIZE};
use tellur::vm::{BytecodeEmitter, BytecodeLabel, LocalVar};

proptest! {
    #[test]
    fn type_interning_is_identity(reps in 1usize..5, len in 0u64..64) {
        let mut types = TypeInterner::new();
        let base = types.builtin(BuiltinKind::Int32);
        let first_ptr = types.pointer_to(base);
        let first_arr = types.array_of(len, base);
        for _ in 0..reps {
            prop_assert_eq!(types.pointer_to(base), first_ptr);
            prop_assert_eq!(types.array_of(len, base), first_arr);
        }
    }

    #[test]
    fn struct_layout_is_aligned(field_kinds in proptest::collection::vec(0u8..5, 1..12)) {
        let mut strings = StringInterner::new();
        let mut types = TypeInterner::new();
        let fields: Vec<Field> = field_kinds
            .iter()
            .enumerate()
            .map(|(i, &kind)| {
                let ty = match kind {
                    0 => BuiltinKind::Int8,
                    1 => BuiltinKind::Int16,
                    2 => BuiltinKind::Int32,
                    3 => BuiltinKind::Int64,
                    _ => BuiltinKind::Float64,
                };
                Field {
                    name: strings.intern(&format!("f{i}")),
                    ty: types.builtin(ty),
                }
            })
            .collect();
        let st = types.struct_type(fields.clone());

        let mut prev_end = 0u32;
        for field in &fields {
            let (field_ty, offset) = types
                .struct_field(st, field.name)
                .expect("field exists");
            let align = types.align_of(field_ty);
            prop_assert!(offset >= prev_end);
            prop_assert_eq!(offset % align, 0);
            prev_end = offset + types.size_of(field_ty);
        }
        let align = types.align_of(st);
        prop_assert!(types.size_of(st) >= prev_end);
        prop_assert_eq!(types.size_of(st) % align, 0);
    }

    #[test]
    fn forward_jumps_patch_to_signed_delta(filler in 0usize..24) {
        let mut emitter = BytecodeEmitter::new();
        let mut label = BytecodeLabel::new();
        let offset_pos = emitter.position() + 2;
        emitter.emit_jump(&mut label);
        for i in 0..filler {
            emitter.emit_assign_imm8(LocalVar::new(8 * i as u32, tellur::vm::AddressMode::Address), i as i64);
        }
        emitter.bind(&mut label);
        let target = label.offset().expect("bound");
        let buf = emitter.finish();
        let delta = i32::from_le_bytes(buf[offset_pos..offset_pos + 4].try_into().expect("4"));
        prop_assert_eq!(delta as i64, (target - offset_pos) as i64);
    }

    #[test]
    fn tid_list_round_trips(tids in proptest::collection::btree_set(0usize..512, 0..128)) {
        let mut list = TupleIdList::new(512);
        for &tid in &tids {
            list.add(tid);
        }
        prop_assert_eq!(list.len(), tids.len());

        // Selection-vector round trip.
        let mut sel = [0u16; 512];
        let n = list.to_selection_vector(&mut sel);
        let mut round = TupleIdList::new(512);
        round.from_selection_vector(&sel[..n]);
        prop_assert_eq!(&round, &list);

        // Identity algebra.
        let empty = TupleIdList::new(512);
        let mut full = TupleIdList::new(512);
        full.add_all();
        let mut union_empty = list.clone();
        union_empty.union_with(&empty);
        prop_assert_eq!(&union_empty, &list);
        let mut intersect_full = list.clone();
        intersect_full.intersect_with(&full);
        prop_assert_eq!(&intersect_full, &list);
    }

    #[test]
    fn bit_byte_selection_conversions_agree(
        tids in proptest::collection::btree_set(0usize..DEFAULT_VECTOR_SIZE, 0..256)
    ) {
        let mut list = TupleIdList::new(DEFAULT_VECTOR_SIZE);
        for &tid in &tids {
            list.add(tid);
        }
        // bitmap -> byte vector -> list
        let mut bytes = vec![0u8; DEFAULT_VECTOR_SIZE];
        list.to_byte_vector(&mut bytes);
        let mut from_bytes = TupleIdList::new(DEFAULT_VECTOR_SIZE);
        from_bytes.from_byte_vector(&bytes);
        // byte vector -> selection vector -> list
        let mut sel = vec![0u16; DEFAULT_VECTOR_SIZE];
        let n = from_bytes.to_selection_vector(&mut sel);
        let mut from_sel = TupleIdList::new(DEFAULT_VECTOR_SIZE);
        from_sel.from_selection_vector(&sel[..n]);

        let direct: Vec<usize> = list.to_vec();
        prop_assert_eq!(from_bytes.to_vec(), direct.clone());
        prop_assert_eq!(from_sel.to_vec(), direct);
    }

    #[test]
    fn arithmetic_propagates_nulls(
        values in proptest::collection::vec((any::<i32>(), any::<bool>(), any::<i32>(), any::<bool>()), 1..64)
    ) {
        let mut left = Vector::new(TypeId::Integer);
        let mut right = Vector::new(TypeId::Integer);
        left.set_size(values.len());
        right.set_size(values.len());
        for (i, (a, a_null, b, b_null)) in values.iter().enumerate() {
            left.set::<i32>(i, *a);
            left.set_null(i, *a_null);
            right.set::<i32>(i, *b);
            right.set_null(i, *b_null);
        }
        let mut out = Vector::new(TypeId::Integer);
        vector_ops::add(&left, &right, &mut out).expect("add");
        for (i, (_, a_null, _, b_null)) in values.iter().enumerate() {
            prop_assert_eq!(out.is_null(i), *a_null || *b_null);
        }
    }

    #[test]
    fn selection_restricts_and_is_exact(
        values in proptest::collection::vec(proptest::option::of(-100i32..100), 1..128),
        threshold in -100i32..100,
        pre_filter in proptest::collection::btree_set(0usize..128, 0..64)
    ) {
        let mut input = Vector::new(TypeId::Integer);
        input.set_size(values.len());
        for (i, v) in values.iter().enumerate() {
            match v {
                Some(v) => input.set::<i32>(i, *v),
                None => input.set_null(i, true),
            }
        }
        let constant = Vector::constant(&GenericValue::Integer(Some(threshold)), values.len());
        let mut list = TupleIdList::new(values.len());
        for &tid in pre_filter.iter().filter(|&&t| t < values.len()) {
            list.add(tid);
        }
        let before = list.clone();
        vector_ops::select_lt(&input, &constant, &mut list).expect("select");

        // L' ⊆ L, and membership is exactly the predicate over L.
        for tid in 0..values.len() {
            let expected = before.contains(tid)
                && values[tid].is_some_and(|v| v < threshold);
            prop_assert_eq!(list.contains(tid), expected);
        }
    }

    #[test]
    fn sort_law_holds(values in proptest::collection::vec(any::<i64>(), 0..256)) {
        let mut sorter = Sorter::new(
            Box::new(|l, r| {
                let a = unsafe { l.cast::<i64>().read_unaligned() };
                let b = unsafe { r.cast::<i64>().read_unaligned() };
                match a.cmp(&b) {
                    std::cmp::Ordering::Less => -1,
                    std::cmp::Ordering::Equal => 0,
                    std::cmp::Ordering::Greater => 1,
                }
            }),
            8,
        );
        for &v in &values {
            let row = sorter.alloc_input_tuple();
            unsafe { row.cast::<i64>().write_unaligned(v) };
        }
        sorter.sort();
        let sorted: Vec<i64> = sorter
            .tuples()
            .iter()
            .map(|&p| unsafe { p.cast::<i64>().read_unaligned() })
            .collect();
        let mut expected = values.clone();
        expected.sort_unstable();
        prop_assert_eq!(sorted, expected);
    }

    #[test]
    fn top_k_law_holds(values in proptest::collection::vec(any::<i64>(), 0..256), k in 1u64..32) {
        let mut sorter = Sorter::new(
            Box::new(|l, r| {
                let a = unsafe { l.cast::<i64>().read_unaligned() };
                let b = unsafe { r.cast::<i64>().read_unaligned() };
                match a.cmp(&b) {
                    std::cmp::Ordering::Less => -1,
                    std::cmp::Ordering::Equal => 0,
                    std::cmp::Ordering::Greater => 1,
                }
            }),
            8,
        );
        for &v in &values {
            let row = sorter.alloc_input_tuple_top_k(k);
            unsafe { row.cast::<i64>().write_unaligned(v) };
            sorter.alloc_input_tuple_top_k_finish(k);
        }
        sorter.sort();
        let kept: Vec<i64> = sorter
            .tuples()
            .iter()
            .map(|&p| unsafe { p.cast::<i64>().read_unaligned() })
            .collect();
        prop_assert!(kept.len() <= k as usize);
        let mut expected = values.clone();
        expected.sort_unstable();
        expected.truncate(k as usize);
        prop_assert_eq!(kept, expected);
    }
}
