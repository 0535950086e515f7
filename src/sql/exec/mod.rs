//! Query execution context and output plumbing.
//!
//! An [`ExecutionContext`] is created by the host per query invocation and
//! passed by pointer through generated code. It carries the catalog, the
//! thread-state container for parallel pipelines, and the output row buffer
//! the root operator writes into.

use std::sync::Arc;

use super::catalog::Catalog;
use super::thread_state::ThreadStateContainer;
use crate::util::ChunkedVector;

/// Receives finalized output rows.
pub type OutputCallback = Box<dyn FnMut(&[u8]) + Send>;

/// Accumulates fixed-size output rows and hands them to a consumer at
/// finalization.
pub struct OutputBuffer {
    row_size: usize,
    rows: ChunkedVector,
    callback: Option<OutputCallback>,
}

impl OutputBuffer {
    pub fn new(row_size: usize, callback: Option<OutputCallback>) -> Self {
        OutputBuffer {
            row_size,
            rows: ChunkedVector::new(row_size.max(1)),
            callback,
        }
    }

    /// Allocate the next output row for the producer to fill.
    pub fn alloc_row(&mut self) -> *mut u8 {
        self.rows.append()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Drain buffered rows through the callback.
    pub fn finalize(&mut self) {
        if let Some(callback) = &mut self.callback {
            for i in 0..self.rows.len() {
                let row =
                    unsafe { std::slice::from_raw_parts(self.rows.row(i), self.row_size) };
                callback(row);
            }
        }
        self.rows = ChunkedVector::new(self.row_size.max(1));
    }
}

impl std::fmt::Debug for OutputBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputBuffer")
            .field("row_size", &self.row_size)
            .field("rows", &self.rows.len())
            .finish()
    }
}

/// Per-invocation execution state.
#[derive(Debug)]
pub struct ExecutionContext {
    catalog: Arc<Catalog>,
    /// Heap-pinned so generated code can hold raw pointers to it.
    thread_states: Box<ThreadStateContainer>,
    output: OutputBuffer,
    rows_emitted: usize,
}

impl ExecutionContext {
    pub fn new(catalog: Arc<Catalog>, output_row_size: usize, callback: Option<OutputCallback>) -> Self {
        ExecutionContext {
            catalog,
            thread_states: Box::new(ThreadStateContainer::new()),
            output: OutputBuffer::new(output_row_size, callback),
            rows_emitted: 0,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn thread_states(&self) -> &ThreadStateContainer {
        &self.thread_states
    }

    pub fn thread_states_ptr(&mut self) -> *mut ThreadStateContainer {
        std::ptr::addr_of_mut!(*self.thread_states)
    }

    pub fn alloc_output_row(&mut self) -> *mut u8 {
        self.rows_emitted += 1;
        self.output.alloc_row()
    }

    pub fn finalize_output(&mut self) {
        self.output.finalize();
    }

    /// Rows emitted so far across the whole query.
    pub fn rows_emitted(&self) -> usize {
        self.rows_emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_output_rows_flow_to_callback() {
        static SEEN: AtomicUsize = AtomicUsize::new(0);
        let catalog = Arc::new(Catalog::new());
        let mut ctx = ExecutionContext::new(
            catalog,
            8,
            Some(Box::new(|row: &[u8]| {
                let value = i64::from_le_bytes(row.try_into().expect("8 bytes"));
                SEEN.fetch_add(value as usize, Ordering::Relaxed);
            })),
        );
        for v in [1i64, 2, 3] {
            let row = ctx.alloc_output_row();
            unsafe { row.cast::<i64>().write_unaligned(v) };
        }
        ctx.finalize_output();
        assert_eq!(SEEN.load(Ordering::Relaxed), 6);
        assert_eq!(ctx.rows_emitted(), 3);
    }
}
