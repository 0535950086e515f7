//! TID-list representation benchmarks.
//!
//! Measures iteration and conversion across the three interchangeable
//! active-tuple representations (bitmap-backed TID list, byte match
//! vector, and dense selection vector) at several selectivities.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tellur::sql::{TupleIdList, DEFAULT_VECTOR_SIZE};

fn make_list(selectivity: f64) -> TupleIdList {
    let mut rng = StdRng::seed_from_u64(0xbeef);
    let mut list = TupleIdList::new(DEFAULT_VECTOR_SIZE);
    for tid in 0..DEFAULT_VECTOR_SIZE {
        if rng.gen_bool(selectivity) {
            list.add(tid);
        }
    }
    list
}

fn bench_iteration(c: &mut Criterion) {
    let mut group = c.benchmark_group("tid_iteration");
    for selectivity in [0.01, 0.1, 0.5, 0.9] {
        let list = make_list(selectivity);

        group.bench_with_input(
            BenchmarkId::new("bitmap", selectivity),
            &list,
            |b, list| {
                b.iter(|| {
                    let mut sum = 0usize;
                    list.for_each(|tid| sum += tid);
                    black_box(sum)
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("selection_vector", selectivity),
            &list,
            |b, list| {
                let mut sel = vec![0u16; DEFAULT_VECTOR_SIZE];
                let n = list.to_selection_vector(&mut sel);
                b.iter(|| {
                    let mut sum = 0usize;
                    for &tid in &sel[..n] {
                        sum += tid as usize;
                    }
                    black_box(sum)
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("byte_vector", selectivity),
            &list,
            |b, list| {
                let mut bytes = vec![0u8; DEFAULT_VECTOR_SIZE];
                list.to_byte_vector(&mut bytes);
                b.iter(|| {
                    let mut sum = 0usize;
                    for (tid, &byte) in bytes.iter().enumerate() {
                        if byte != 0 {
                            sum += tid;
                        }
                    }
                    black_box(sum)
                });
            },
        );
    }
    group.finish();
}

fn bench_conversions(c: &mut Criterion) {
    let mut group = c.benchmark_group("tid_conversions");
    for selectivity in [0.01, 0.5, 0.9] {
        let list = make_list(selectivity);

        group.bench_with_input(
            BenchmarkId::new("to_selection_vector", selectivity),
            &list,
            |b, list| {
                let mut sel = vec![0u16; DEFAULT_VECTOR_SIZE];
                b.iter(|| black_box(list.to_selection_vector(&mut sel)));
            },
        );

        group.bench_with_input(
            BenchmarkId::new("to_byte_vector", selectivity),
            &list,
            |b, list| {
                let mut bytes = vec![0u8; DEFAULT_VECTOR_SIZE];
                b.iter(|| {
                    list.to_byte_vector(&mut bytes);
                    black_box(bytes[0])
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("byte_vector_round_trip", selectivity),
            &list,
            |b, list| {
                let mut bytes = vec![0u8; DEFAULT_VECTOR_SIZE];
                list.to_byte_vector(&mut bytes);
                let mut out = TupleIdList::new(DEFAULT_VECTOR_SIZE);
                b.iter(|| {
                    out.from_byte_vector(&bytes);
                    black_box(out.len())
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_iteration, bench_conversions);
criterion_main!(benches);
