//! Vectorized hashing.
//!
//! Writes a 64-bit hash per active tuple. NULLs hash to a fixed value so a
//! NULL key still lands in a deterministic bucket; key-equality checks keep
//! NULL groups apart where SQL requires it.

use super::exec;
use crate::sql::runtime_types::VarlenEntry;
use crate::sql::vector::Vector;
use crate::sql::TypeId;
use crate::util::hashing as h;

const NULL_HASH: u64 = 0;

fn hash_one(input: &Vector, i: usize) -> u64 {
    if input.is_null(i) {
        return NULL_HASH;
    }
    match input.type_id() {
        TypeId::Boolean => h::hash_u64(u64::from(input.get::<u8>(i))),
        TypeId::TinyInt => h::hash_u64(input.get::<i8>(i) as u64),
        TypeId::SmallInt => h::hash_u64(input.get::<i16>(i) as u64),
        TypeId::Integer | TypeId::Date => h::hash_u64(input.get::<i32>(i) as u64),
        TypeId::BigInt | TypeId::Timestamp => h::hash_u64(input.get::<i64>(i) as u64),
        TypeId::Float => h::hash_u64(u64::from(input.get::<f32>(i).to_bits())),
        TypeId::Double => h::hash_u64(input.get::<f64>(i).to_bits()),
        TypeId::Hash => input.get::<u64>(i),
        TypeId::Pointer => h::hash_u64(input.get::<usize>(i) as u64),
        TypeId::Varchar => input.get::<VarlenEntry>(i).hash(),
    }
}

/// Hash every active tuple of `input` into `result` (a Hash-typed vector).
pub fn hash(input: &Vector, result: &mut Vector) {
    debug_assert_eq!(result.type_id(), TypeId::Hash);
    super::match_shape(input, result);
    exec(input, |i| {
        let value = hash_one(input, i);
        result.set::<u64>(i, value);
        result.set_null(i, false);
    });
}

/// Fold per-tuple hashes of `input` into the seed hashes already present in
/// `result`.
pub fn hash_combine(input: &Vector, result: &mut Vector) {
    debug_assert_eq!(result.type_id(), TypeId::Hash);
    exec(input, |i| {
        let seed = result.get::<u64>(i);
        result.set::<u64>(i, h::hash_combine(seed, hash_one(input, i)));
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic_and_spread() {
        let mut v = Vector::new(TypeId::Integer);
        v.set_size(4);
        for i in 0..4 {
            v.set::<i32>(i, i as i32);
        }
        let mut h1 = Vector::new(TypeId::Hash);
        let mut h2 = Vector::new(TypeId::Hash);
        hash(&v, &mut h1);
        hash(&v, &mut h2);
        assert_eq!(h1.as_slice::<u64>(), h2.as_slice::<u64>());
        // All distinct inputs hash differently here.
        let hs = h1.as_slice::<u64>();
        for i in 0..4 {
            for j in i + 1..4 {
                assert_ne!(hs[i], hs[j]);
            }
        }
    }

    #[test]
    fn test_hash_combine_differs_from_plain_hash() {
        let mut a = Vector::new(TypeId::Integer);
        a.set_size(1);
        a.set::<i32>(0, 42);
        let mut seed = Vector::new(TypeId::Hash);
        hash(&a, &mut seed);
        let plain = seed.get::<u64>(0);
        hash_combine(&a, &mut seed);
        assert_ne!(seed.get::<u64>(0), plain);
    }

    #[test]
    fn test_equal_strings_hash_equal() {
        let mut v = Vector::new(TypeId::Varchar);
        v.set_size(2);
        v.set_string(0, b"some longer string to force heap storage!");
        v.set_string(1, b"some longer string to force heap storage!");
        let mut out = Vector::new(TypeId::Hash);
        hash(&v, &mut out);
        assert_eq!(out.get::<u64>(0), out.get::<u64>(1));
    }
}
