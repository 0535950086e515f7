//! Tuple-id lists: the active-tuple sets threaded through every vectorized
//! kernel.
//!
//! A TID list is an ordered set of tuple indexes in `[0, capacity)` backed by
//! a word-aligned bitmap with an eagerly maintained population count. The
//! set always stores ascending TIDs and iterates in that order. A list
//! converts losslessly to and from a dense `u16` selection vector and a byte
//! match vector (0x00/0xFF per tuple); the three representations are
//! interchangeable and the benchmark harness exercises the conversions.

use crate::util::BitVector;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleIdList {
    bitmap: BitVector,
    count: usize,
}

impl TupleIdList {
    /// An empty list over `capacity` tuples.
    pub fn new(capacity: usize) -> Self {
        TupleIdList {
            bitmap: BitVector::new(capacity),
            count: 0,
        }
    }

    /// The capacity (exclusive TID upper bound).
    pub fn capacity(&self) -> usize {
        self.bitmap.num_bits()
    }

    /// The number of active TIDs.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == self.capacity()
    }

    /// Grow or shrink the capacity, clearing contents.
    pub fn resize(&mut self, capacity: usize) {
        if capacity != self.capacity() {
            self.bitmap = BitVector::new(capacity);
            self.count = 0;
        } else {
            self.clear();
        }
    }

    pub fn contains(&self, tid: usize) -> bool {
        self.bitmap.test(tid)
    }

    pub fn add(&mut self, tid: usize) {
        if !self.bitmap.test(tid) {
            self.bitmap.set(tid);
            self.count += 1;
        }
    }

    pub fn remove(&mut self, tid: usize) {
        if self.bitmap.test(tid) {
            self.bitmap.unset(tid);
            self.count -= 1;
        }
    }

    /// Add every TID in `[0, capacity)`.
    pub fn add_all(&mut self) {
        self.bitmap.set_all();
        self.count = self.capacity();
    }

    /// Add every TID in `[start, end)`.
    pub fn add_range(&mut self, start: usize, end: usize) {
        self.bitmap.set_range(start, end);
        self.count = self.bitmap.count_ones();
    }

    pub fn clear(&mut self) {
        self.bitmap.reset();
        self.count = 0;
    }

    /// Become an exact copy of `other` (capacities must match).
    pub fn assign_from(&mut self, other: &TupleIdList) {
        debug_assert_eq!(self.capacity(), other.capacity());
        self.bitmap = other.bitmap.clone();
        self.count = other.count;
    }

    pub fn union_with(&mut self, other: &TupleIdList) {
        self.bitmap.union(&other.bitmap);
        self.count = self.bitmap.count_ones();
    }

    pub fn intersect_with(&mut self, other: &TupleIdList) {
        self.bitmap.intersect(&other.bitmap);
        self.count = self.bitmap.count_ones();
    }

    /// Remove every TID present in `other`.
    pub fn unset_from(&mut self, other: &TupleIdList) {
        self.bitmap.difference(&other.bitmap);
        self.count = self.bitmap.count_ones();
    }

    /// Flip membership of every TID.
    pub fn flip_all(&mut self) {
        self.bitmap.flip_all();
        self.count = self.capacity() - self.count;
    }

    /// Keep only TIDs for which `pred` holds. Called in ascending order.
    pub fn filter<F: FnMut(usize) -> bool>(&mut self, pred: F) {
        self.bitmap.retain(pred);
        self.count = self.bitmap.count_ones();
    }

    /// Visit every TID in ascending order.
    #[inline]
    pub fn for_each<F: FnMut(usize)>(&self, f: F) {
        self.bitmap.for_each_set_bit(f);
    }

    /// Collect into a Vec (test helper and row-collection path).
    pub fn to_vec(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.count);
        self.for_each(|tid| out.push(tid));
        out
    }

    // -----------------------------------------------------------------
    // Alternate representations
    // -----------------------------------------------------------------

    /// Write the active TIDs into `out` as a dense ascending selection
    /// vector, returning the count.
    pub fn to_selection_vector(&self, out: &mut [u16]) -> usize {
        let mut k = 0;
        self.for_each(|tid| {
            out[k] = tid as u16;
            k += 1;
        });
        k
    }

    /// Rebuild from a dense selection vector.
    pub fn from_selection_vector(&mut self, sel: &[u16]) {
        self.clear();
        for &tid in sel {
            self.add(tid as usize);
        }
    }

    /// Write a byte match vector: 0xFF for active TIDs, 0x00 otherwise.
    pub fn to_byte_vector(&self, out: &mut [u8]) {
        debug_assert!(out.len() >= self.capacity());
        out[..self.capacity()].fill(0);
        self.for_each(|tid| out[tid] = 0xFF);
    }

    /// Rebuild from a byte match vector (any non-zero byte is a match).
    pub fn from_byte_vector(&mut self, bytes: &[u8]) {
        self.clear();
        for (tid, &b) in bytes.iter().take(self.capacity()).enumerate() {
            if b != 0 {
                self.add(tid);
            }
        }
    }
}

impl std::fmt::Display for TupleIdList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TIDs[")?;
        let mut first = true;
        let mut result = Ok(());
        self.for_each(|tid| {
            if result.is_ok() {
                if !first {
                    result = write!(f, ",");
                }
                if result.is_ok() {
                    result = write!(f, "{tid}");
                }
                first = false;
            }
        });
        result?;
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_remove_count() {
        let mut list = TupleIdList::new(100);
        assert!(list.is_empty());
        list.add(5);
        list.add(5);
        list.add(99);
        assert_eq!(list.len(), 2);
        assert!(list.contains(5));
        list.remove(5);
        list.remove(5);
        assert_eq!(list.len(), 1);
        assert!(!list.contains(5));
    }

    #[test]
    fn test_iteration_is_ascending() {
        let mut list = TupleIdList::new(2048);
        for tid in [2000, 3, 64, 1024, 65] {
            list.add(tid);
        }
        assert_eq!(list.to_vec(), vec![3, 64, 65, 1024, 2000]);
    }

    #[test]
    fn test_set_algebra() {
        let mut a = TupleIdList::new(64);
        let mut b = TupleIdList::new(64);
        a.add_range(0, 32);
        b.add_range(16, 48);

        let mut u = a.clone();
        u.union_with(&b);
        assert_eq!(u.len(), 48);

        let mut i = a.clone();
        i.intersect_with(&b);
        assert_eq!(i.len(), 16);

        let mut d = a.clone();
        d.unset_from(&b);
        assert_eq!(d.len(), 16);
        assert!(d.contains(0));
        assert!(!d.contains(16));
    }

    #[test]
    fn test_union_with_empty_and_intersect_with_full_are_identity() {
        let mut list = TupleIdList::new(128);
        for tid in [1, 17, 90] {
            list.add(tid);
        }
        let snapshot = list.clone();

        let empty = TupleIdList::new(128);
        list.union_with(&empty);
        assert_eq!(list, snapshot);

        let mut full = TupleIdList::new(128);
        full.add_all();
        list.intersect_with(&full);
        assert_eq!(list, snapshot);
    }

    #[test]
    fn test_selection_vector_round_trip() {
        let mut list = TupleIdList::new(512);
        for tid in [0, 7, 63, 64, 300, 511] {
            list.add(tid);
        }
        let mut sel = [0u16; 512];
        let n = list.to_selection_vector(&mut sel);
        assert_eq!(n, 6);
        assert_eq!(&sel[..n], &[0, 7, 63, 64, 300, 511]);

        let mut round = TupleIdList::new(512);
        round.from_selection_vector(&sel[..n]);
        assert_eq!(round, list);
    }

    #[test]
    fn test_byte_vector_round_trip() {
        let mut list = TupleIdList::new(64);
        for tid in [1, 2, 40] {
            list.add(tid);
        }
        let mut bytes = [0u8; 64];
        list.to_byte_vector(&mut bytes);
        assert_eq!(bytes[1], 0xFF);
        assert_eq!(bytes[0], 0x00);

        let mut round = TupleIdList::new(64);
        round.from_byte_vector(&bytes);
        assert_eq!(round, list);
    }

    #[test]
    fn test_filter() {
        let mut list = TupleIdList::new(32);
        list.add_all();
        list.filter(|tid| tid % 4 == 0);
        assert_eq!(list.to_vec(), vec![0, 4, 8, 12, 16, 20, 24, 28]);
    }

    #[test]
    fn test_flip_all() {
        let mut list = TupleIdList::new(10);
        list.add(0);
        list.add(9);
        list.flip_all();
        assert_eq!(list.len(), 8);
        assert!(!list.contains(0));
        assert!(list.contains(5));
    }
}
