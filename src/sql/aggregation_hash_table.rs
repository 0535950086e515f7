//! The aggregation hash table.
//!
//! Grouped aggregation state lives in payloads behind the same
//! `{hash, next}` entry header the join table uses; group keys sit raw at
//! the front of each payload, in key-column order. The main directory grows
//! as groups are inserted.
//!
//! Parallel builds insert *partitioned*: new entries go to per-partition
//! overflow lists (radix-partitioned on the high hash bits) instead of the
//! directory. `transfer_partitions` later walks every thread-local table's
//! partitions and folds each into the global table through a caller-supplied
//! merge function, adopting the local row stores so entry pointers stay
//! valid; `parallel_partitioned_scan` then divides the merged directory
//! across workers to produce output in parallel.

use tracing::debug;

use super::error::Result;
use super::join_hash_table::HashTableEntry;
use super::thread_state::ThreadStateContainer;
use super::vector::Vector;
use super::vpi::VectorProjectionIterator;
use super::TypeId;
use crate::util::ChunkedVector;

/// Number of radix partitions used by partitioned inserts.
pub const NUM_PARTITIONS: usize = 64;
const PARTITION_SHIFT: u32 = 64 - NUM_PARTITIONS.trailing_zeros();

/// Payload constructor/updater: `(payload, positioned_input)`.
pub type AggTupleFn<'a> = dyn Fn(*mut u8, &mut VectorProjectionIterator) -> Result<()> + 'a;

/// Per-partition merge callback: `(global_table, partition_iterator)`.
pub type MergePartitionFn<'a> =
    dyn Fn(*mut AggregationHashTable, &mut AhtOverflowPartitionIterator) -> Result<()> + Sync + 'a;

/// Partition-scan worker callback: `(ctx, thread_state, iterator)`.
pub type PartitionScanFn<'a> =
    dyn Fn(*mut u8, *mut u8, &mut AhtIterator) -> Result<()> + Sync + 'a;

pub struct AggregationHashTable {
    payload_size: usize,
    rows: ChunkedVector,
    adopted: Vec<Vec<Box<[u8]>>>,
    directory: Vec<*mut HashTableEntry>,
    mask: u64,
    /// Entries linked into the directory.
    count: usize,
    /// Overflow list heads for partitioned inserts.
    partitions: Vec<*mut HashTableEntry>,
}

impl AggregationHashTable {
    const INITIAL_DIRECTORY: usize = 256;

    /// A table whose group payloads are `payload_size` bytes.
    pub fn new(payload_size: usize) -> Self {
        AggregationHashTable {
            payload_size,
            rows: ChunkedVector::new(HashTableEntry::payload_offset() + payload_size),
            adopted: Vec::new(),
            directory: vec![std::ptr::null_mut(); Self::INITIAL_DIRECTORY],
            mask: (Self::INITIAL_DIRECTORY - 1) as u64,
            count: 0,
            partitions: vec![std::ptr::null_mut(); NUM_PARTITIONS],
        }
    }

    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    /// The number of groups in the main directory.
    pub fn num_groups(&self) -> usize {
        self.count
    }

    fn partition_of(hash: u64) -> usize {
        (hash >> PARTITION_SHIFT) as usize
    }

    fn grow_directory_if_needed(&mut self) {
        if self.count < self.directory.len() * 3 / 4 {
            return;
        }
        let new_size = self.directory.len() * 2;
        let mut directory = vec![std::ptr::null_mut::<HashTableEntry>(); new_size];
        let mask = (new_size - 1) as u64;
        // Relink every chained entry into the doubled directory.
        for &head in &self.directory {
            let mut entry = head;
            while !entry.is_null() {
                let next = unsafe { (*entry).next };
                let bucket = unsafe { ((*entry).hash & mask) as usize };
                unsafe { (*entry).next = directory[bucket] };
                directory[bucket] = entry;
                entry = next;
            }
        }
        self.directory = directory;
        self.mask = mask;
    }

    fn alloc_entry(&mut self, hash: u64) -> *mut HashTableEntry {
        let row = self.rows.append().cast::<HashTableEntry>();
        unsafe {
            (*row).hash = hash;
            (*row).next = std::ptr::null_mut();
        }
        row
    }

    /// Insert a fresh group for `hash`, returning its zeroed payload. When
    /// `partitioned`, the entry lands in an overflow partition rather than
    /// the directory.
    pub fn insert(&mut self, hash: u64, partitioned: bool) -> *mut u8 {
        let entry = self.alloc_entry(hash);
        if partitioned {
            let p = Self::partition_of(hash);
            unsafe { (*entry).next = self.partitions[p] };
            self.partitions[p] = entry;
        } else {
            self.grow_directory_if_needed();
            let bucket = (hash & self.mask) as usize;
            unsafe { (*entry).next = self.directory[bucket] };
            self.directory[bucket] = entry;
            self.count += 1;
        }
        HashTableEntry::payload_mut(entry)
    }

    /// Find the group for `hash` whose payload passes `key_eq`.
    pub fn lookup(&self, hash: u64, key_eq: impl Fn(*const u8) -> bool) -> Option<*mut u8> {
        let mut entry = self.directory[(hash & self.mask) as usize];
        while !entry.is_null() {
            unsafe {
                if (*entry).hash == hash {
                    let payload = HashTableEntry::payload_mut(entry);
                    if key_eq(payload) {
                        return Some(payload);
                    }
                }
                entry = (*entry).next;
            }
        }
        None
    }

    /// Grouped insertion over a whole batch.
    ///
    /// Hashes the key columns, then for each active tuple either merges into
    /// its existing group (`merge_fn`) or initializes a fresh payload
    /// (`init_fn`, with keys at the payload front in key-column order).
    pub fn process_batch(
        &mut self,
        vpi: &mut VectorProjectionIterator,
        key_columns: &[usize],
        init_fn: &AggTupleFn<'_>,
        merge_fn: &AggTupleFn<'_>,
        partitioned: bool,
    ) -> Result<()> {
        let vp = unsafe { &*vpi.projection_ptr() };
        let mut hashes = Vector::new(TypeId::Hash);
        vp.hash(key_columns, &mut hashes);

        while vpi.has_next() {
            let tid = vpi.current_tid();
            let hash = hashes.get::<u64>(tid);
            let existing = self.lookup(hash, |payload| {
                Self::keys_equal(vp, key_columns, tid, payload)
            });
            match existing {
                Some(payload) => merge_fn(payload, vpi)?,
                None => {
                    let payload = self.insert(hash, partitioned);
                    init_fn(payload, vpi)?;
                }
            }
            vpi.advance();
        }
        vpi.reset();
        Ok(())
    }

    /// Raw comparison of a tuple's key columns against the keys stored at
    /// the front of a payload.
    fn keys_equal(
        vp: &super::projection::VectorProjection,
        key_columns: &[usize],
        tid: usize,
        payload: *const u8,
    ) -> bool {
        let mut offset = 0usize;
        for &col in key_columns {
            let column = vp.column(col);
            let width = column.type_id().size();
            let stored = unsafe { std::slice::from_raw_parts(payload.add(offset), width) };
            let matches = match width {
                1 => column.get::<u8>(tid) == stored[0],
                2 => column.get::<i16>(tid).to_le_bytes()[..] == stored[..],
                4 => column.get::<i32>(tid).to_le_bytes()[..] == stored[..],
                8 => column.get::<i64>(tid).to_le_bytes()[..] == stored[..],
                _ => {
                    let probe = column.get::<super::runtime_types::VarlenEntry>(tid);
                    let held = unsafe {
                        payload
                            .add(offset)
                            .cast::<super::runtime_types::VarlenEntry>()
                            .read_unaligned()
                    };
                    probe == held
                }
            };
            if !matches {
                return false;
            }
            offset += width;
        }
        true
    }

    /// Fold every thread-local table's overflow partitions into this table.
    ///
    /// For each non-empty partition of each local table (living at byte
    /// `ht_offset` inside each strip), `merge_fn(self, iterator)` is invoked
    /// with an iterator over that partition's entries. Local row stores are
    /// adopted afterwards so merged-from entries stay readable.
    pub fn transfer_partitions(
        &mut self,
        thread_states: &ThreadStateContainer,
        ht_offset: usize,
        merge_fn: &MergePartitionFn<'_>,
    ) -> Result<()> {
        let mut locals: Vec<*mut AggregationHashTable> = Vec::new();
        thread_states.for_each_state(|strip| {
            locals.push(unsafe { strip.add(ht_offset).cast::<AggregationHashTable>() });
        });
        debug!(workers = locals.len(), "transferring aggregation partitions");

        let this = std::ptr::addr_of_mut!(*self);
        for &local_ptr in &locals {
            let local = unsafe { &mut *local_ptr };
            for p in 0..NUM_PARTITIONS {
                let head = local.partitions[p];
                if head.is_null() {
                    continue;
                }
                let mut iter = AhtOverflowPartitionIterator::new(head);
                merge_fn(this, &mut iter)?;
                local.partitions[p] = std::ptr::null_mut();
            }
            self.adopted.push(local.rows.release_chunks());
        }
        Ok(())
    }

    /// Scan the merged directory in parallel: buckets are divided into
    /// contiguous ranges, one worker task per range, each receiving an
    /// iterator over its range.
    pub fn parallel_partitioned_scan(
        &self,
        ctx: *mut u8,
        thread_states: &ThreadStateContainer,
        scan_fn: &PartitionScanFn<'_>,
    ) -> Result<()> {
        use rayon::prelude::*;

        let buckets = self.directory.len();
        let tasks = rayon::current_num_threads().max(1) * 2;
        let grain = buckets.div_ceil(tasks).max(1);
        let ranges: Vec<(usize, usize)> = (0..buckets)
            .step_by(grain)
            .map(|start| (start, (start + grain).min(buckets)))
            .collect();

        let ctx = ctx as usize;
        ranges.into_par_iter().try_for_each(|(start, end)| {
            let mut iter = AhtIterator::over_bucket_range(self, start, end);
            let thread_state = thread_states.access_current_thread_state();
            scan_fn(ctx as *mut u8, thread_state, &mut iter)
        })
    }
}

impl std::fmt::Debug for AggregationHashTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregationHashTable")
            .field("groups", &self.count)
            .field("directory", &self.directory.len())
            .finish()
    }
}

unsafe impl Send for AggregationHashTable {}
unsafe impl Sync for AggregationHashTable {}

/// Iterates the groups of an aggregation table (optionally a bucket
/// sub-range, for parallel output).
pub struct AhtIterator {
    table: *const AggregationHashTable,
    bucket: usize,
    end_bucket: usize,
    entry: *const HashTableEntry,
}

impl AhtIterator {
    pub fn new(table: &AggregationHashTable) -> Self {
        Self::over_bucket_range(table, 0, table.directory.len())
    }

    pub fn over_bucket_range(table: &AggregationHashTable, start: usize, end: usize) -> Self {
        let mut iter = AhtIterator {
            table,
            bucket: start,
            end_bucket: end,
            entry: std::ptr::null(),
        };
        iter.find_next_chain();
        iter
    }

    fn table(&self) -> &AggregationHashTable {
        unsafe { &*self.table }
    }

    fn find_next_chain(&mut self) {
        while self.entry.is_null() && self.bucket < self.end_bucket {
            self.entry = self.table().directory[self.bucket];
            self.bucket += 1;
        }
    }

    pub fn has_next(&self) -> bool {
        !self.entry.is_null()
    }

    pub fn next(&mut self) {
        debug_assert!(self.has_next());
        self.entry = unsafe { (*self.entry).next };
        self.find_next_chain();
    }

    /// The current group's payload.
    pub fn row(&self) -> *const u8 {
        debug_assert!(self.has_next());
        HashTableEntry::payload(self.entry)
    }
}

unsafe impl Send for AhtIterator {}
unsafe impl Sync for AhtIterator {}

/// Iterates one overflow partition's entry list during merges.
pub struct AhtOverflowPartitionIterator {
    current: *const HashTableEntry,
}

impl AhtOverflowPartitionIterator {
    pub fn new(head: *const HashTableEntry) -> Self {
        AhtOverflowPartitionIterator { current: head }
    }

    pub fn has_next(&self) -> bool {
        !self.current.is_null()
    }

    pub fn next(&mut self) {
        debug_assert!(self.has_next());
        self.current = unsafe { (*self.current).next };
    }

    pub fn hash(&self) -> u64 {
        debug_assert!(self.has_next());
        unsafe { (*self.current).hash }
    }

    pub fn row(&self) -> *const u8 {
        debug_assert!(self.has_next());
        HashTableEntry::payload(self.current)
    }
}

unsafe impl Send for AhtOverflowPartitionIterator {}
unsafe impl Sync for AhtOverflowPartitionIterator {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::hashing::hash_u64;

    /// Payload layout in these tests: key i64, then count i64.
    fn upsert(table: &mut AggregationHashTable, key: i64, partitioned: bool) {
        let hash = hash_u64(key as u64);
        let found = table.lookup(hash, |payload| {
            unsafe { payload.cast::<i64>().read_unaligned() == key }
        });
        match found {
            Some(payload) => unsafe {
                let count_ptr = payload.cast::<i64>().add(1);
                count_ptr.write_unaligned(count_ptr.read_unaligned() + 1);
            },
            None => {
                let payload = table.insert(hash, partitioned);
                unsafe {
                    payload.cast::<i64>().write_unaligned(key);
                    payload.cast::<i64>().add(1).write_unaligned(1);
                }
            }
        }
    }

    fn group_counts(table: &AggregationHashTable) -> Vec<(i64, i64)> {
        let mut out = Vec::new();
        let mut iter = AhtIterator::new(table);
        while iter.has_next() {
            let payload = iter.row();
            let key = unsafe { payload.cast::<i64>().read_unaligned() };
            let count = unsafe { payload.cast::<i64>().add(1).read_unaligned() };
            out.push((key, count));
            iter.next();
        }
        out.sort_unstable();
        out
    }

    #[test]
    fn test_insert_lookup_and_iterate() {
        let mut table = AggregationHashTable::new(16);
        for i in 0..1000i64 {
            upsert(&mut table, i % 10, false);
        }
        assert_eq!(table.num_groups(), 10);
        let groups = group_counts(&table);
        assert_eq!(groups.len(), 10);
        for (key, count) in groups {
            assert!((0..10).contains(&key));
            assert_eq!(count, 100);
        }
    }

    #[test]
    fn test_directory_growth_preserves_groups() {
        let mut table = AggregationHashTable::new(16);
        // Enough distinct groups to force several directory doublings.
        for i in 0..10_000i64 {
            upsert(&mut table, i, false);
        }
        assert_eq!(table.num_groups(), 10_000);
        for key in [0i64, 1234, 9999] {
            let hash = hash_u64(key as u64);
            let found = table.lookup(hash, |p| unsafe {
                p.cast::<i64>().read_unaligned() == key
            });
            assert!(found.is_some(), "group {key} lost during growth");
        }
    }

    #[test]
    fn test_partitioned_insert_bypasses_directory() {
        let mut table = AggregationHashTable::new(16);
        upsert(&mut table, 7, true);
        assert_eq!(table.num_groups(), 0);
        // The entry sits in its overflow partition.
        let occupied: usize = table
            .partitions
            .iter()
            .filter(|head| !head.is_null())
            .count();
        assert_eq!(occupied, 1);
    }

    #[test]
    fn test_partitioned_merge_equals_serial() {
        use crate::sql::thread_state::ThreadStateContainer;

        // Serial reference over keys 0..50, 40 occurrences each.
        let mut serial = AggregationHashTable::new(16);
        for i in 0..2000i64 {
            upsert(&mut serial, i % 50, false);
        }

        // Thread-local tables inserting partitioned.
        let mut tls = ThreadStateContainer::new();
        tls.reset(
            std::mem::size_of::<AggregationHashTable>(),
            Some(Box::new(|_, state| unsafe {
                state
                    .cast::<AggregationHashTable>()
                    .write(AggregationHashTable::new(16));
            })),
            None,
            std::ptr::null_mut(),
        );
        std::thread::scope(|scope| {
            let tls = &tls;
            for chunk in 0..4i64 {
                scope.spawn(move || {
                    let strip = tls.access_current_thread_state();
                    let local = unsafe { &mut *strip.cast::<AggregationHashTable>() };
                    for i in (chunk * 500)..((chunk + 1) * 500) {
                        // Aggregate locally first: same key upserts into the
                        // local partitioned entry.
                        let key = i % 50;
                        let hash = hash_u64(key as u64);
                        let mut found = None;
                        for head in &local.partitions {
                            let mut entry = *head;
                            while !entry.is_null() {
                                unsafe {
                                    if (*entry).hash == hash {
                                        let p = HashTableEntry::payload_mut(entry);
                                        if p.cast::<i64>().read_unaligned() == key {
                                            found = Some(p);
                                            break;
                                        }
                                    }
                                    entry = (*entry).next;
                                }
                            }
                            if found.is_some() {
                                break;
                            }
                        }
                        match found {
                            Some(p) => unsafe {
                                let c = p.cast::<i64>().add(1);
                                c.write_unaligned(c.read_unaligned() + 1);
                            },
                            None => {
                                let p = local.insert(hash, true);
                                unsafe {
                                    p.cast::<i64>().write_unaligned(key);
                                    p.cast::<i64>().add(1).write_unaligned(1);
                                }
                            }
                        }
                    }
                });
            }
        });

        // Merge partials into the global table.
        let mut global = AggregationHashTable::new(16);
        let merge: &MergePartitionFn<'_> = &|table, iter| {
            let table = unsafe { &mut *table };
            while iter.has_next() {
                let hash = iter.hash();
                let row = iter.row();
                let key = unsafe { row.cast::<i64>().read_unaligned() };
                let partial = unsafe { row.cast::<i64>().add(1).read_unaligned() };
                let found = table.lookup(hash, |p| unsafe {
                    p.cast::<i64>().read_unaligned() == key
                });
                match found {
                    Some(p) => unsafe {
                        let c = p.cast::<i64>().add(1);
                        c.write_unaligned(c.read_unaligned() + partial);
                    },
                    None => {
                        let p = table.insert(hash, false);
                        unsafe {
                            p.cast::<i64>().write_unaligned(key);
                            p.cast::<i64>().add(1).write_unaligned(partial);
                        }
                    }
                }
                iter.next();
            }
            Ok(())
        };
        global.transfer_partitions(&tls, 0, merge).expect("merge");

        assert_eq!(group_counts(&global), group_counts(&serial));
    }

    #[test]
    fn test_process_batch_groups_a_projection() {
        use crate::sql::projection::VectorProjection;
        use crate::sql::vpi::VectorProjectionIterator;
        use crate::sql::TypeId;

        // One key column with values 0,1,2 cycling over 30 tuples.
        let mut vp = VectorProjection::new();
        vp.setup(&[TypeId::BigInt]);
        vp.reset(30);
        for i in 0..30 {
            vp.column_mut(0).set::<i64>(i, (i % 3) as i64);
        }
        let mut vpi = VectorProjectionIterator::new();
        vpi.set_vector_projection(&mut vp);

        // Payload: raw i64 key then i64 count (keys at the payload front).
        let mut table = AggregationHashTable::new(16);
        let init = |payload: *mut u8, vpi: &mut VectorProjectionIterator| -> Result<()> {
            let key = vpi.get_integer(0).value;
            unsafe {
                payload.cast::<i64>().write_unaligned(key);
                payload.cast::<i64>().add(1).write_unaligned(1);
            }
            Ok(())
        };
        let merge = |payload: *mut u8, _vpi: &mut VectorProjectionIterator| -> Result<()> {
            unsafe {
                let count = payload.cast::<i64>().add(1);
                count.write_unaligned(count.read_unaligned() + 1);
            }
            Ok(())
        };
        table
            .process_batch(&mut vpi, &[0], &init, &merge, false)
            .expect("process");

        let groups = group_counts(&table);
        assert_eq!(groups, vec![(0, 10), (1, 10), (2, 10)]);
    }

    #[test]
    fn test_parallel_partitioned_scan_sees_every_group() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let mut table = AggregationHashTable::new(16);
        for i in 0..500i64 {
            upsert(&mut table, i, false);
        }
        let mut tls = ThreadStateContainer::new();
        tls.reset(8, None, None, std::ptr::null_mut());

        let seen = AtomicUsize::new(0);
        let scan: &PartitionScanFn<'_> = &|_, _, iter| {
            while iter.has_next() {
                seen.fetch_add(1, Ordering::Relaxed);
                iter.next();
            }
            Ok(())
        };
        table
            .parallel_partitioned_scan(std::ptr::null_mut(), &tls, scan)
            .expect("scan");
        assert_eq!(seen.load(Ordering::Relaxed), 500);
    }
}
