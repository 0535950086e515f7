//! The chained-bucket join hash table.
//!
//! Build-side rows are materialized into a chunked row store behind a fixed
//! entry header `{hash, next}`; entries never move once allocated, so bucket
//! pointers reference payloads directly. The directory is sized to a power
//! of two and buckets chain entries sharing `hash & mask`.
//!
//! The serial build links chains single-threaded. The parallel build has
//! every worker build its thread-local table, then reserves one directory
//! sized for the sum of all local entry counts and lets the workers insert
//! their own entries with CAS on the bucket heads; the local row stores are
//! transferred (not copied) into the global table, keeping every entry
//! address valid. Chain order under concurrent insertion is unspecified;
//! probes disambiguate with key checks.

use std::sync::atomic::{AtomicPtr, Ordering};

use tracing::debug;

use super::tuple_id_list::TupleIdList;
use super::vector::Vector;
use super::vector_ops::exec;
use super::TypeId;
use crate::util::ChunkedVector;

/// The fixed header preceding every payload in the row store.
#[derive(Debug)]
#[repr(C)]
pub struct HashTableEntry {
    pub hash: u64,
    pub next: *mut HashTableEntry,
}

impl HashTableEntry {
    /// Byte offset from an entry to its payload.
    pub const fn payload_offset() -> usize {
        std::mem::size_of::<HashTableEntry>()
    }

    /// The payload that follows this entry header.
    pub fn payload(entry: *const HashTableEntry) -> *const u8 {
        unsafe { entry.cast::<u8>().add(Self::payload_offset()) }
    }

    pub fn payload_mut(entry: *mut HashTableEntry) -> *mut u8 {
        unsafe { entry.cast::<u8>().add(Self::payload_offset()) }
    }
}

/// Build state. `Built` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildState {
    Building,
    Built,
}

pub struct JoinHashTable {
    /// Entry rows: header + payload.
    rows: ChunkedVector,
    /// Row stores adopted from thread-local tables during parallel builds.
    adopted: Vec<Vec<Box<[u8]>>>,
    /// Bucket heads; length is a power of two.
    directory: Vec<AtomicPtr<HashTableEntry>>,
    mask: u64,
    state: BuildState,
    tuple_size: usize,
}

impl JoinHashTable {
    /// A table whose payloads are `tuple_size` bytes.
    pub fn new(tuple_size: usize) -> Self {
        JoinHashTable {
            rows: ChunkedVector::new(HashTableEntry::payload_offset() + tuple_size),
            adopted: Vec::new(),
            directory: Vec::new(),
            mask: 0,
            state: BuildState::Building,
            tuple_size,
        }
    }

    pub fn tuple_size(&self) -> usize {
        self.tuple_size
    }

    pub fn num_elements(&self) -> usize {
        self.rows.len()
    }

    pub fn is_built(&self) -> bool {
        self.state == BuildState::Built
    }

    /// The directory size (zero before build).
    pub fn directory_size(&self) -> usize {
        self.directory.len()
    }

    /// Allocate an entry for a row hashing to `hash`, returning the payload
    /// pointer for the caller to fill. Build-phase only.
    pub fn alloc(&mut self, hash: u64) -> *mut u8 {
        debug_assert!(!self.is_built(), "insert into built table");
        let row = self.rows.append();
        let entry = row.cast::<HashTableEntry>();
        unsafe {
            (*entry).hash = hash;
            (*entry).next = std::ptr::null_mut();
        }
        HashTableEntry::payload_mut(entry)
    }

    fn allocate_directory(count: usize) -> (Vec<AtomicPtr<HashTableEntry>>, u64) {
        let size = (count.max(1) * 2).next_power_of_two();
        let mut directory = Vec::with_capacity(size);
        directory.resize_with(size, || AtomicPtr::new(std::ptr::null_mut()));
        (directory, (size - 1) as u64)
    }

    /// Serial build: size the directory and link every entry into its
    /// bucket chain. Idempotent; the built state is terminal.
    pub fn build(&mut self) {
        if self.is_built() {
            return;
        }
        let (directory, mask) = Self::allocate_directory(self.rows.len());
        self.directory = directory;
        self.mask = mask;
        for i in 0..self.rows.len() {
            let entry = self.rows.row_mut(i).cast::<HashTableEntry>();
            let hash = unsafe { (*entry).hash };
            let bucket = &self.directory[(hash & self.mask) as usize];
            // Single-threaded: plain head push.
            unsafe { (*entry).next = bucket.load(Ordering::Relaxed) };
            bucket.store(entry, Ordering::Relaxed);
        }
        self.state = BuildState::Built;
        debug!(
            entries = self.rows.len(),
            directory = self.directory.len(),
            "join hash table built"
        );
    }

    /// CAS-push `entry` onto its bucket chain in a shared directory.
    fn insert_cas(directory: &[AtomicPtr<HashTableEntry>], mask: u64, entry: *mut HashTableEntry) {
        let hash = unsafe { (*entry).hash };
        let bucket = &directory[(hash & mask) as usize];
        loop {
            let head = bucket.load(Ordering::Relaxed);
            unsafe { (*entry).next = head };
            if bucket
                .compare_exchange_weak(head, entry, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    /// Parallel build over thread-local tables.
    ///
    /// Every strip in `thread_states` holds a thread-local `JoinHashTable`
    /// at byte offset `ht_offset`. Each local table is built, the global
    /// directory is reserved for the sum of local entry counts, the workers
    /// CAS-insert their own entries, and the local row stores transfer into
    /// this table so entry pointers stay valid.
    pub fn build_parallel(
        &mut self,
        thread_states: &super::thread_state::ThreadStateContainer,
        ht_offset: usize,
    ) {
        use rayon::prelude::*;

        if self.is_built() {
            return;
        }

        let mut locals: Vec<*mut JoinHashTable> = Vec::new();
        thread_states.for_each_state(|strip| {
            locals.push(unsafe { strip.add(ht_offset).cast::<JoinHashTable>() });
        });

        let local_tables: Vec<&mut JoinHashTable> = locals
            .iter()
            .map(|&ptr| unsafe { &mut *ptr })
            .collect();
        let total: usize = local_tables.iter().map(|t| t.num_elements()).sum();
        debug!(
            workers = local_tables.len(),
            entries = total,
            "parallel join hash table build"
        );

        let (directory, mask) = Self::allocate_directory(total);
        self.directory = directory;
        self.mask = mask;

        let directory_ref = &self.directory;
        local_tables.into_par_iter().for_each(|local| {
            local.build();
            for i in 0..local.rows.len() {
                let entry = local.rows.row_mut(i).cast::<HashTableEntry>();
                Self::insert_cas(directory_ref, mask, entry);
            }
        });

        // Adopt the local row stores; their chunks own the entry memory.
        for &ptr in &locals {
            let local = unsafe { &mut *ptr };
            self.adopted.push(local.rows.release_chunks());
        }

        self.state = BuildState::Built;
    }

    /// The head of the bucket chain for `hash`. The caller walks `next`,
    /// testing entry hashes and key equality.
    pub fn lookup(&self, hash: u64) -> *const HashTableEntry {
        debug_assert!(self.is_built(), "lookup before build");
        self.directory[(hash & self.mask) as usize].load(Ordering::Acquire)
    }

    /// Prime `iter` to walk the chain for `hash`.
    pub fn lookup_iter(&self, hash: u64, iter: &mut HashTableEntryIterator) {
        iter.reset(self.lookup(hash), hash);
    }

    /// Vectorized lookup: for every active tuple of `hashes`, store the
    /// bucket-head pointer into `out` (a Pointer vector).
    pub fn lookup_batch(&self, hashes: &Vector, out: &mut Vector) {
        debug_assert_eq!(hashes.type_id(), TypeId::Hash);
        debug_assert_eq!(out.type_id(), TypeId::Pointer);
        super::vector_ops::match_shape(hashes, out);
        exec(hashes, |i| {
            let head = self.lookup(hashes.get::<u64>(i));
            out.set_null(i, false);
            out.set::<usize>(i, head as usize);
        });
    }

    /// TIDs of `pointers` whose current entry is non-null (test helper for
    /// probes priming their active set).
    pub fn non_null_entries(pointers: &Vector, out: &mut TupleIdList) {
        out.filter(|tid| pointers.get::<usize>(tid) != 0);
    }
}

impl std::fmt::Debug for JoinHashTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinHashTable")
            .field("entries", &self.rows.len())
            .field("directory", &self.directory.len())
            .field("built", &self.is_built())
            .finish()
    }
}

unsafe impl Send for JoinHashTable {}
unsafe impl Sync for JoinHashTable {}

/// Walks a bucket chain, yielding payloads of entries whose hash matches the
/// probe hash. Key equality remains the caller's job.
#[derive(Debug)]
pub struct HashTableEntryIterator {
    current: *const HashTableEntry,
    hash: u64,
}

impl HashTableEntryIterator {
    pub fn new() -> Self {
        HashTableEntryIterator {
            current: std::ptr::null(),
            hash: 0,
        }
    }

    pub fn reset(&mut self, head: *const HashTableEntry, hash: u64) {
        self.current = head;
        self.hash = hash;
    }

    /// Advance to the next entry with a matching hash, if any.
    pub fn has_next(&mut self) -> bool {
        unsafe {
            while !self.current.is_null() && (*self.current).hash != self.hash {
                self.current = (*self.current).next;
            }
        }
        !self.current.is_null()
    }

    /// The payload of the current matching entry; moves past it.
    pub fn get_row(&mut self) -> *const u8 {
        debug_assert!(!self.current.is_null());
        let entry = self.current;
        self.current = unsafe { (*entry).next };
        HashTableEntry::payload(entry)
    }
}

impl Default for HashTableEntryIterator {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for HashTableEntryIterator {}
unsafe impl Sync for HashTableEntryIterator {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::hashing::hash_u64;

    fn insert_row(table: &mut JoinHashTable, key: i64, value: i64) {
        let hash = hash_u64(key as u64);
        let payload = table.alloc(hash);
        unsafe {
            payload.cast::<i64>().write_unaligned(key);
            payload.cast::<i64>().add(1).write_unaligned(value);
        }
    }

    fn chain_rows(table: &JoinHashTable, key: i64) -> Vec<(i64, i64)> {
        let mut iter = HashTableEntryIterator::new();
        table.lookup_iter(hash_u64(key as u64), &mut iter);
        let mut rows = Vec::new();
        while iter.has_next() {
            let payload = iter.get_row();
            let k = unsafe { payload.cast::<i64>().read_unaligned() };
            let v = unsafe { payload.cast::<i64>().add(1).read_unaligned() };
            if k == key {
                rows.push((k, v));
            }
        }
        rows
    }

    #[test]
    fn test_build_and_lookup() {
        let mut table = JoinHashTable::new(16);
        for key in 0..100 {
            insert_row(&mut table, key, key * 10);
        }
        table.build();
        assert!(table.is_built());
        assert!(table.directory_size().is_power_of_two());
        for key in 0..100 {
            let rows = chain_rows(&table, key);
            assert_eq!(rows, vec![(key, key * 10)]);
        }
        assert!(chain_rows(&table, 5000).is_empty());
    }

    #[test]
    fn test_duplicate_keys_chain_completely() {
        // 500 distinct entries under one key: the probe must visit all 500.
        let mut table = JoinHashTable::new(16);
        for i in 0..500 {
            insert_row(&mut table, 42, i);
        }
        table.build();
        let rows = chain_rows(&table, 42);
        assert_eq!(rows.len(), 500);
        let mut values: Vec<i64> = rows.iter().map(|(_, v)| *v).collect();
        values.sort_unstable();
        assert_eq!(values, (0..500).collect::<Vec<_>>());
    }

    #[test]
    fn test_build_is_terminal() {
        let mut table = JoinHashTable::new(8);
        insert_row(&mut table, 1, 1);
        table.build();
        let dir = table.directory_size();
        table.build();
        assert_eq!(table.directory_size(), dir);
    }

    #[test]
    fn test_lookup_batch_points_at_buckets() {
        let mut table = JoinHashTable::new(16);
        insert_row(&mut table, 7, 70);
        table.build();

        let mut hashes = Vector::new(TypeId::Hash);
        hashes.set_size(2);
        hashes.set::<u64>(0, hash_u64(7));
        hashes.set::<u64>(1, hash_u64(123456));
        let mut out = Vector::new(TypeId::Pointer);
        table.lookup_batch(&hashes, &mut out);

        let head = out.get::<usize>(0);
        assert_ne!(head, 0);
        let entry = head as *const HashTableEntry;
        assert_eq!(unsafe { (*entry).hash }, hash_u64(7));
    }

    #[test]
    fn test_parallel_build_matches_serial_contents() {
        use crate::sql::thread_state::ThreadStateContainer;

        // Serial reference.
        let mut serial = JoinHashTable::new(16);
        for key in 0..1000i64 {
            insert_row(&mut serial, key % 100, key);
        }
        serial.build();

        // Parallel: local tables live in thread strips.
        let mut tls = ThreadStateContainer::new();
        tls.reset(
            std::mem::size_of::<JoinHashTable>(),
            Some(Box::new(|_, state| unsafe {
                state.cast::<JoinHashTable>().write(JoinHashTable::new(16));
            })),
            None,
            std::ptr::null_mut(),
        );

        // Populate from multiple threads.
        std::thread::scope(|scope| {
            let tls = &tls;
            for chunk in 0..4i64 {
                scope.spawn(move || {
                    let strip = tls.access_current_thread_state();
                    let local = unsafe { &mut *strip.cast::<JoinHashTable>() };
                    for key in (chunk * 250)..((chunk + 1) * 250) {
                        insert_row(local, key % 100, key);
                    }
                });
            }
        });

        let mut global = JoinHashTable::new(16);
        global.build_parallel(&tls, 0);
        assert!(global.is_built());
        assert_eq!(global.num_elements(), 0); // rows live in adopted stores
        for key in 0..100 {
            let mut serial_rows = chain_rows(&serial, key);
            let mut parallel_rows = chain_rows(&global, key);
            serial_rows.sort_unstable();
            parallel_rows.sort_unstable();
            assert_eq!(serial_rows, parallel_rows, "bucket contents for key {key}");
        }
    }
}
