//! Vector-at-a-time table scans.
//!
//! A [`TableVectorIterator`] walks a range of a table's blocks, materializing
//! up to [`DEFAULT_VECTOR_SIZE`](super::DEFAULT_VECTOR_SIZE) tuples per
//! `advance` into a vector projection and exposing them through a
//! [`VectorProjectionIterator`]. `parallel_scan` splits the block range
//! across rayon workers, each driving its own iterator to completion; it
//! blocks until every worker finishes and iteration order across workers is
//! unspecified.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use super::error::Result;
use super::projection::VectorProjection;
use super::runtime_types::VarlenEntry;
use super::table::Table;
use super::vpi::VectorProjectionIterator;
use super::{TypeId, DEFAULT_VECTOR_SIZE};

/// Minimum number of blocks handed to one parallel scan task.
pub const MIN_BLOCK_RANGE_SIZE: usize = 2;

/// Worker callback: `(query_state, thread_state, iterator)`.
pub type ScanFn<'a> = dyn Fn(*mut u8, *mut u8, &mut TableVectorIterator) -> Result<()> + Sync + 'a;

#[derive(Debug)]
pub struct TableVectorIterator {
    table: Arc<Table>,
    column_indexes: Vec<usize>,
    /// Next block to materialize, exclusive end.
    current_block: usize,
    end_block: usize,
    /// Read position within the current block.
    block_offset: usize,
    /// Heap-pinned so raw pointers into them survive moves of `self`.
    projection: Box<VectorProjection>,
    vpi: Box<VectorProjectionIterator>,
    initialized: bool,
}

impl TableVectorIterator {
    /// Iterate the whole table, projecting all columns.
    pub fn new(table: Arc<Table>) -> Self {
        let end = table.num_blocks();
        Self::over_range(table, 0, end)
    }

    /// Iterate blocks `[start, end)`, projecting all columns.
    pub fn over_range(table: Arc<Table>, start: usize, end: usize) -> Self {
        let column_indexes = (0..table.schema().num_columns()).collect();
        Self::with_columns(table, start, end, column_indexes)
    }

    /// Iterate blocks `[start, end)`, projecting only `column_indexes`.
    pub fn with_columns(
        table: Arc<Table>,
        start: usize,
        end: usize,
        column_indexes: Vec<usize>,
    ) -> Self {
        TableVectorIterator {
            table,
            column_indexes,
            current_block: start,
            end_block: end,
            block_offset: 0,
            projection: Box::new(VectorProjection::new()),
            vpi: Box::new(VectorProjectionIterator::new()),
            initialized: false,
        }
    }

    /// Allocate the projection. Returns false if the column set is empty.
    pub fn init(&mut self) -> bool {
        if self.initialized {
            return true;
        }
        if self.column_indexes.is_empty() {
            return false;
        }
        let types: Vec<TypeId> = self
            .column_indexes
            .iter()
            .map(|&c| self.table.schema().column(c).type_id)
            .collect();
        self.projection.setup(&types);
        self.end_block = self.end_block.min(self.table.num_blocks());
        self.initialized = true;
        true
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    /// The iterator over the current batch.
    pub fn vector_projection_iterator(&mut self) -> *mut VectorProjectionIterator {
        std::ptr::addr_of_mut!(*self.vpi)
    }

    /// Materialize the next batch. Returns false when the range is drained.
    pub fn advance(&mut self) -> bool {
        debug_assert!(self.initialized);
        // Skip empty blocks.
        while self.current_block < self.end_block {
            let block = self.table.block(self.current_block);
            if self.block_offset < block.tuple_count() {
                break;
            }
            self.current_block += 1;
            self.block_offset = 0;
        }
        if self.current_block >= self.end_block {
            return false;
        }

        let block = self.table.block(self.current_block);
        let batch = (block.tuple_count() - self.block_offset).min(DEFAULT_VECTOR_SIZE);
        self.projection.reset(batch);

        for (out_idx, &col_idx) in self.column_indexes.iter().enumerate() {
            let segment = block.segment(col_idx);
            let vector = self.projection.column_mut(out_idx);
            for i in 0..batch {
                let row = self.block_offset + i;
                if segment.is_null(row) {
                    vector.set_null(i, true);
                    continue;
                }
                vector.set_null(i, false);
                let raw = segment.raw(row);
                match segment.type_id() {
                    TypeId::Boolean | TypeId::TinyInt => vector.set::<u8>(i, raw[0]),
                    TypeId::SmallInt => {
                        vector.set::<i16>(i, i16::from_le_bytes([raw[0], raw[1]]));
                    }
                    TypeId::Integer | TypeId::Date | TypeId::Float => {
                        let mut buf = [0u8; 4];
                        buf.copy_from_slice(raw);
                        vector.set::<i32>(i, i32::from_le_bytes(buf));
                    }
                    TypeId::BigInt
                    | TypeId::Timestamp
                    | TypeId::Double
                    | TypeId::Hash
                    | TypeId::Pointer => {
                        let mut buf = [0u8; 8];
                        buf.copy_from_slice(raw);
                        vector.set::<i64>(i, i64::from_le_bytes(buf));
                    }
                    TypeId::Varchar => {
                        let entry = unsafe { raw.as_ptr().cast::<VarlenEntry>().read_unaligned() };
                        vector.set::<VarlenEntry>(i, entry);
                    }
                }
            }
        }

        self.block_offset += batch;
        let vp = std::ptr::addr_of_mut!(*self.projection);
        self.vpi.set_vector_projection(vp);
        true
    }

    /// Scan `[start_block, end_block)` ranges of `table` in parallel, calling
    /// `scan_fn(query_state, this_thread_state, iterator)` once per range.
    /// Blocks until all workers complete; an error in any worker aborts the
    /// scan and the first recorded error is returned.
    pub fn parallel_scan(
        table: &Arc<Table>,
        query_state: *mut u8,
        thread_states: &super::thread_state::ThreadStateContainer,
        scan_fn: &ScanFn<'_>,
        min_grain_size: usize,
    ) -> Result<()> {
        use rayon::prelude::*;

        let num_blocks = table.num_blocks();
        if num_blocks == 0 {
            return Ok(());
        }
        let grain = min_grain_size
            .max(num_blocks.div_ceil(rayon::current_num_threads().max(1) * 4))
            .max(1);
        let ranges: Vec<(usize, usize)> = (0..num_blocks)
            .step_by(grain)
            .map(|start| (start, (start + grain).min(num_blocks)))
            .collect();
        debug!(
            blocks = num_blocks,
            tasks = ranges.len(),
            "launching parallel table scan"
        );

        let failed = AtomicBool::new(false);
        let query_state = query_state as usize;
        ranges.into_par_iter().try_for_each(|(start, end)| {
            if failed.load(Ordering::Acquire) {
                return Ok(());
            }
            let mut iter = TableVectorIterator::over_range(Arc::clone(table), start, end);
            iter.init();
            let thread_state = thread_states.access_current_thread_state();
            let result = scan_fn(query_state as *mut u8, thread_state, &mut iter);
            if result.is_err() {
                failed.store(true, Ordering::Release);
            }
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::catalog::{Catalog, SMALL_1, TEST_1};

    fn scan_count(iter: &mut TableVectorIterator) -> usize {
        let mut total = 0;
        while iter.advance() {
            let vpi = iter.vector_projection_iterator();
            let vpi = unsafe { &mut *vpi };
            while vpi.has_next() {
                total += 1;
                vpi.advance();
            }
            vpi.reset();
        }
        total
    }

    #[test]
    fn test_full_scan_visits_every_row() {
        let catalog = Catalog::with_test_tables();
        let table = catalog.lookup_table_by_id(SMALL_1).expect("small_1");
        let expected = table.num_rows();
        let mut iter = TableVectorIterator::new(table);
        assert!(iter.init());
        assert_eq!(scan_count(&mut iter), expected);
    }

    #[test]
    fn test_block_range_scan() {
        let catalog = Catalog::with_test_tables();
        let table = catalog.lookup_table_by_id(TEST_1).expect("test_1");
        let block0_rows = table.block(0).tuple_count();
        let mut iter = TableVectorIterator::over_range(Arc::clone(&table), 0, 1);
        assert!(iter.init());
        assert_eq!(scan_count(&mut iter), block0_rows);
    }

    #[test]
    fn test_empty_table_scan() {
        let catalog = Catalog::with_test_tables();
        let table = catalog.lookup_table_by_name("empty_table").expect("empty");
        let mut iter = TableVectorIterator::new(table);
        assert!(iter.init());
        assert!(!iter.advance());
    }

    #[test]
    fn test_parallel_scan_covers_table_once() {
        use std::sync::atomic::AtomicUsize;

        let catalog = Catalog::with_test_tables();
        let table = catalog.lookup_table_by_id(TEST_1).expect("test_1");
        let mut tls = crate::sql::ThreadStateContainer::new();
        tls.reset(8, None, None, std::ptr::null_mut());

        let counter = AtomicUsize::new(0);
        let scan = |_qs: *mut u8, _ts: *mut u8, iter: &mut TableVectorIterator| -> Result<()> {
            let mut rows = 0usize;
            while iter.advance() {
                let vpi = unsafe { &mut *iter.vector_projection_iterator() };
                rows += vpi.active_tuple_count();
                while vpi.has_next() {
                    vpi.advance();
                }
                vpi.reset();
            }
            counter.fetch_add(rows, Ordering::Relaxed);
            Ok(())
        };
        TableVectorIterator::parallel_scan(&table, std::ptr::null_mut(), &tls, &scan, 2)
            .expect("scan");
        assert_eq!(counter.load(Ordering::Relaxed), table.num_rows());
    }
}
