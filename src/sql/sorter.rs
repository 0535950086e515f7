//! The sorter: chunked row storage, pointer-array sorting, Top-K, and
//! parallel merge.
//!
//! Input rows are allocated out of a chunked store (never moved), and `sort`
//! orders a flat array of row pointers with the configured comparator
//! (`< 0` means the left row precedes the right). Top-K insertion maintains
//! a bounded max-heap over the pointer array so only the K smallest rows
//! are retained; `sort` then drains the heap. The parallel variants gather
//! rows from every thread-local sorter, adopting their row stores so
//! pointers stay valid, and merge into one globally sorted array.

use std::cmp::Ordering;

use tracing::debug;

use super::thread_state::ThreadStateContainer;
use crate::util::ChunkedVector;

/// Row comparator: negative when `lhs` precedes `rhs`.
pub type ComparisonFn = Box<dyn Fn(*const u8, *const u8) -> i32 + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortState {
    Building,
    Sorted,
}

pub struct Sorter {
    rows: ChunkedVector,
    adopted: Vec<Vec<Box<[u8]>>>,
    tuple_ptrs: Vec<*const u8>,
    cmp: ComparisonFn,
    state: SortState,
    /// Set while a Top-K insert awaits its `finish` call.
    topk_pending: bool,
}

impl Sorter {
    /// A sorter for rows of `tuple_size` bytes ordered by `cmp`.
    pub fn new(cmp: ComparisonFn, tuple_size: usize) -> Self {
        Sorter {
            rows: ChunkedVector::new(tuple_size),
            adopted: Vec::new(),
            tuple_ptrs: Vec::new(),
            cmp,
            state: SortState::Building,
            topk_pending: false,
        }
    }

    pub fn tuple_size(&self) -> usize {
        self.rows.element_size()
    }

    pub fn num_tuples(&self) -> usize {
        self.tuple_ptrs.len().max(self.rows.len())
    }

    pub fn is_sorted(&self) -> bool {
        self.state == SortState::Sorted
    }

    fn compare(&self, lhs: *const u8, rhs: *const u8) -> Ordering {
        (self.cmp)(lhs, rhs).cmp(&0)
    }

    /// Allocate one uninitialized input row; the caller writes the row
    /// layout directly.
    pub fn alloc_input_tuple(&mut self) -> *mut u8 {
        debug_assert!(!self.is_sorted(), "insert into sorted sorter");
        let row = self.rows.append();
        self.tuple_ptrs.push(row.cast_const());
        row
    }

    // -----------------------------------------------------------------
    // Top-K
    // -----------------------------------------------------------------

    /// Allocate a row intended for a Top-`k` sort. Must be paired with
    /// [`Self::alloc_input_tuple_top_k_finish`] after the caller fills it.
    pub fn alloc_input_tuple_top_k(&mut self, _top_k: u64) -> *mut u8 {
        debug_assert!(!self.topk_pending);
        self.topk_pending = true;
        let row = self.rows.append();
        self.tuple_ptrs.push(row.cast_const());
        row
    }

    /// Complete a Top-K insertion: heapify the just-appended row, and when
    /// over capacity evict the current maximum.
    pub fn alloc_input_tuple_top_k_finish(&mut self, top_k: u64) {
        debug_assert!(self.topk_pending);
        self.topk_pending = false;
        let k = top_k as usize;

        // Sift the appended row up the max-heap.
        self.heap_sift_up(self.tuple_ptrs.len() - 1);

        if self.tuple_ptrs.len() > k {
            // Evict the maximum: swap the root with the last slot, drop it,
            // and restore the heap property.
            let last = self.tuple_ptrs.len() - 1;
            self.tuple_ptrs.swap(0, last);
            self.tuple_ptrs.pop();
            self.heap_sift_down(0);
        }
    }

    fn heap_sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if self.compare(self.tuple_ptrs[index], self.tuple_ptrs[parent]) == Ordering::Greater {
                self.tuple_ptrs.swap(index, parent);
                index = parent;
            } else {
                break;
            }
        }
    }

    fn heap_sift_down(&mut self, mut index: usize) {
        let len = self.tuple_ptrs.len();
        loop {
            let (left, right) = (2 * index + 1, 2 * index + 2);
            let mut largest = index;
            if left < len
                && self.compare(self.tuple_ptrs[left], self.tuple_ptrs[largest])
                    == Ordering::Greater
            {
                largest = left;
            }
            if right < len
                && self.compare(self.tuple_ptrs[right], self.tuple_ptrs[largest])
                    == Ordering::Greater
            {
                largest = right;
            }
            if largest == index {
                break;
            }
            self.tuple_ptrs.swap(index, largest);
            index = largest;
        }
    }

    // -----------------------------------------------------------------
    // Sorting
    // -----------------------------------------------------------------

    /// Sort all inserted rows. Idempotent; the sorted state is terminal.
    pub fn sort(&mut self) {
        if self.is_sorted() {
            return;
        }
        self.state = SortState::Sorted;
        let cmp = &self.cmp;
        self.tuple_ptrs
            .sort_unstable_by(|&a, &b| cmp(a, b).cmp(&0));
    }

    /// Gather rows from every thread-local sorter (at `offset` within each
    /// strip), adopt their row stores, and merge into one sorted array.
    pub fn sort_parallel(&mut self, thread_states: &ThreadStateContainer, offset: usize) {
        self.gather_thread_local(thread_states, offset, None);
        debug!(tuples = self.tuple_ptrs.len(), "parallel sort");
        self.state = SortState::Building;
        self.sort();
    }

    /// Parallel Top-K: gather every thread-local sorter's retained rows and
    /// keep the global K smallest.
    pub fn sort_top_k_parallel(
        &mut self,
        thread_states: &ThreadStateContainer,
        offset: usize,
        top_k: u64,
    ) {
        self.gather_thread_local(thread_states, offset, Some(top_k as usize));
        self.state = SortState::Building;
        self.sort();
        self.tuple_ptrs.truncate(top_k as usize);
    }

    fn gather_thread_local(
        &mut self,
        thread_states: &ThreadStateContainer,
        offset: usize,
        _top_k: Option<usize>,
    ) {
        let mut locals: Vec<*mut Sorter> = Vec::new();
        thread_states.for_each_state(|strip| {
            locals.push(unsafe { strip.add(offset).cast::<Sorter>() });
        });
        for &local_ptr in &locals {
            let local = unsafe { &mut *local_ptr };
            self.tuple_ptrs.append(&mut local.tuple_ptrs);
            self.adopted.push(local.rows.release_chunks());
        }
    }

    /// The sorted row pointers. Valid after [`Self::sort`].
    pub fn tuples(&self) -> &[*const u8] {
        &self.tuple_ptrs
    }
}

impl std::fmt::Debug for Sorter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sorter")
            .field("tuples", &self.tuple_ptrs.len())
            .field("sorted", &self.is_sorted())
            .finish()
    }
}

unsafe impl Send for Sorter {}
unsafe impl Sync for Sorter {}

/// Iterates sorted rows. `skip_rows` advances in O(1) by bumping the index.
pub struct SorterIterator {
    sorter: *const Sorter,
    position: usize,
}

impl SorterIterator {
    pub fn new(sorter: &Sorter) -> Self {
        debug_assert!(sorter.is_sorted(), "iterate unsorted sorter");
        SorterIterator {
            sorter,
            position: 0,
        }
    }

    fn sorter(&self) -> &Sorter {
        unsafe { &*self.sorter }
    }

    pub fn has_next(&self) -> bool {
        self.position < self.sorter().tuple_ptrs.len()
    }

    pub fn next(&mut self) {
        self.position += 1;
    }

    /// Jump ahead `n` rows.
    pub fn skip_rows(&mut self, n: usize) {
        self.position += n;
    }

    pub fn row(&self) -> *const u8 {
        self.sorter().tuple_ptrs[self.position]
    }
}

unsafe impl Send for SorterIterator {}
unsafe impl Sync for SorterIterator {}

#[cfg(test)]
mod tests {
    use super::*;

    fn i64_cmp() -> ComparisonFn {
        Box::new(|lhs, rhs| {
            let a = unsafe { lhs.cast::<i64>().read_unaligned() };
            let b = unsafe { rhs.cast::<i64>().read_unaligned() };
            match a.cmp(&b) {
                Ordering::Less => -1,
                Ordering::Equal => 0,
                Ordering::Greater => 1,
            }
        })
    }

    fn insert(sorter: &mut Sorter, value: i64) {
        let row = sorter.alloc_input_tuple();
        unsafe { row.cast::<i64>().write_unaligned(value) };
    }

    fn collect(sorter: &Sorter) -> Vec<i64> {
        sorter
            .tuples()
            .iter()
            .map(|&p| unsafe { p.cast::<i64>().read_unaligned() })
            .collect()
    }

    #[test]
    fn test_sort_orders_ascending() {
        let mut sorter = Sorter::new(i64_cmp(), 8);
        for v in [5i64, 3, 9, 1, 7, 1] {
            insert(&mut sorter, v);
        }
        sorter.sort();
        assert_eq!(collect(&sorter), vec![1, 1, 3, 5, 7, 9]);
    }

    #[test]
    fn test_sort_law_via_comparator() {
        let mut sorter = Sorter::new(i64_cmp(), 8);
        for v in [42i64, -3, 17, 0, 99, -100] {
            insert(&mut sorter, v);
        }
        sorter.sort();
        let rows = sorter.tuples();
        for i in 0..rows.len() {
            for j in i + 1..rows.len() {
                let c = unsafe {
                    rows[i].cast::<i64>().read_unaligned() - rows[j].cast::<i64>().read_unaligned()
                };
                assert!(c <= 0, "rows {i} and {j} out of order");
            }
        }
    }

    #[test]
    fn test_top_k_keeps_smallest() {
        // Keys {3, 1, 4, 1, 5}; Top-2 yields 1, 1 in order.
        let mut sorter = Sorter::new(i64_cmp(), 8);
        for v in [3i64, 1, 4, 1, 5] {
            let row = sorter.alloc_input_tuple_top_k(2);
            unsafe { row.cast::<i64>().write_unaligned(v) };
            sorter.alloc_input_tuple_top_k_finish(2);
        }
        sorter.sort();
        assert_eq!(collect(&sorter), vec![1, 1]);
    }

    #[test]
    fn test_top_k_bound_holds() {
        let mut sorter = Sorter::new(i64_cmp(), 8);
        for v in (0..100i64).rev() {
            let row = sorter.alloc_input_tuple_top_k(10);
            unsafe { row.cast::<i64>().write_unaligned(v) };
            sorter.alloc_input_tuple_top_k_finish(10);
        }
        sorter.sort();
        assert_eq!(collect(&sorter), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_iterator_and_skip() {
        let mut sorter = Sorter::new(i64_cmp(), 8);
        for v in [4i64, 2, 8, 6] {
            insert(&mut sorter, v);
        }
        sorter.sort();
        let mut iter = SorterIterator::new(&sorter);
        assert!(iter.has_next());
        assert_eq!(unsafe { iter.row().cast::<i64>().read_unaligned() }, 2);
        iter.skip_rows(2);
        assert_eq!(unsafe { iter.row().cast::<i64>().read_unaligned() }, 8);
        iter.next();
        assert!(!iter.has_next());
    }

    #[test]
    fn test_parallel_merge_is_globally_sorted() {
        let mut tls = ThreadStateContainer::new();
        tls.reset(
            std::mem::size_of::<Sorter>(),
            Some(Box::new(|_, state| unsafe {
                state.cast::<Sorter>().write(Sorter::new(
                    Box::new(|l, r| {
                        let a = l.cast::<i64>().read_unaligned();
                        let b = r.cast::<i64>().read_unaligned();
                        (a - b).clamp(-1, 1) as i32
                    }),
                    8,
                ));
            })),
            None,
            std::ptr::null_mut(),
        );

        std::thread::scope(|scope| {
            let tls = &tls;
            for chunk in 0..4i64 {
                scope.spawn(move || {
                    let strip = tls.access_current_thread_state();
                    let local = unsafe { &mut *strip.cast::<Sorter>() };
                    for v in (chunk * 100)..((chunk + 1) * 100) {
                        // Insert in a scrambled order.
                        let row = local.alloc_input_tuple();
                        unsafe { row.cast::<i64>().write_unaligned((v * 37) % 400) };
                    }
                });
            }
        });

        let mut global = Sorter::new(i64_cmp(), 8);
        global.sort_parallel(&tls, 0);
        let values = collect(&global);
        assert_eq!(values.len(), 400);
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_parallel_top_k() {
        let mut tls = ThreadStateContainer::new();
        tls.reset(
            std::mem::size_of::<Sorter>(),
            Some(Box::new(|_, state| unsafe {
                state.cast::<Sorter>().write(Sorter::new(
                    Box::new(|l, r| {
                        let a = l.cast::<i64>().read_unaligned();
                        let b = r.cast::<i64>().read_unaligned();
                        (a - b).clamp(-1, 1) as i32
                    }),
                    8,
                ));
            })),
            None,
            std::ptr::null_mut(),
        );

        std::thread::scope(|scope| {
            let tls = &tls;
            for chunk in 0..2i64 {
                scope.spawn(move || {
                    let strip = tls.access_current_thread_state();
                    let local = unsafe { &mut *strip.cast::<Sorter>() };
                    for v in 0..50i64 {
                        let row = local.alloc_input_tuple_top_k(5);
                        unsafe { row.cast::<i64>().write_unaligned(chunk * 50 + v) };
                        local.alloc_input_tuple_top_k_finish(5);
                    }
                });
            }
        });

        let mut global = Sorter::new(i64_cmp(), 8);
        global.sort_top_k_parallel(&tls, 0, 5);
        assert_eq!(collect(&global), vec![0, 1, 2, 3, 4]);
    }
}
