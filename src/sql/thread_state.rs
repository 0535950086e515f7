//! Per-thread operator state.
//!
//! Parallel pipelines give each worker its own strip of a declared state
//! struct (a thread-local join hash table, sorter, or aggregation table).
//! Strips are allocated lazily on a worker's first access and initialized
//! through the configured constructor; `reset` tears everything down and
//! re-arms the container for the next pipeline. Between a reset and a clear
//! a strip is owned by exactly one thread; the coordinator walks all strips
//! only after workers have joined.

use std::thread::ThreadId;

use dashmap::DashMap;

/// Constructor/destructor callbacks: `(context, state_ptr)`.
pub type StateFn = Box<dyn Fn(*mut u8, *mut u8) + Send + Sync>;

/// One thread's state strip, 16-byte aligned.
struct StateStrip {
    storage: Box<[u128]>,
}

impl StateStrip {
    fn new(size: usize) -> Self {
        StateStrip {
            storage: vec![0u128; size.div_ceil(16)].into_boxed_slice(),
        }
    }

    fn as_ptr(&self) -> *mut u8 {
        self.storage.as_ptr().cast_mut().cast()
    }
}

#[derive(Default)]
pub struct ThreadStateContainer {
    state_size: usize,
    init_fn: Option<StateFn>,
    destroy_fn: Option<StateFn>,
    ctx: usize,
    states: DashMap<ThreadId, StateStrip>,
}

impl ThreadStateContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tear down all existing strips, then configure the container so the
    /// next per-thread access allocates a fresh `state_size`-byte strip and
    /// runs `init_fn(ctx, strip)` over it.
    pub fn reset(
        &mut self,
        state_size: usize,
        init_fn: Option<StateFn>,
        destroy_fn: Option<StateFn>,
        ctx: *mut u8,
    ) {
        self.clear();
        self.state_size = state_size;
        self.init_fn = init_fn;
        self.destroy_fn = destroy_fn;
        self.ctx = ctx as usize;
    }

    /// Destroy every strip.
    pub fn clear(&mut self) {
        if let Some(destroy) = &self.destroy_fn {
            for entry in self.states.iter() {
                destroy(self.ctx as *mut u8, entry.value().as_ptr());
            }
        }
        self.states.clear();
    }

    /// This thread's strip, allocating and initializing it on first use.
    pub fn access_current_thread_state(&self) -> *mut u8 {
        let id = std::thread::current().id();
        if let Some(strip) = self.states.get(&id) {
            return strip.as_ptr();
        }
        let strip = StateStrip::new(self.state_size.max(1));
        let ptr = strip.as_ptr();
        self.states.insert(id, strip);
        if let Some(init) = &self.init_fn {
            init(self.ctx as *mut u8, ptr);
        }
        ptr
    }

    /// The number of strips allocated so far.
    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// Apply `f` to every allocated strip. Coordinator-only; callers must
    /// ensure workers have joined.
    pub fn for_each_state<F: FnMut(*mut u8)>(&self, mut f: F) {
        for entry in self.states.iter() {
            f(entry.value().as_ptr());
        }
    }

    /// Apply `callback(ctx, state)` to every strip, the bytecode-facing
    /// flavor of [`Self::for_each_state`].
    pub fn iterate_states(&self, ctx: *mut u8, callback: &dyn Fn(*mut u8, *mut u8)) {
        for entry in self.states.iter() {
            callback(ctx, entry.value().as_ptr());
        }
    }
}

impl Drop for ThreadStateContainer {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for ThreadStateContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadStateContainer")
            .field("state_size", &self.state_size)
            .field("states", &self.states.len())
            .finish()
    }
}

// Strips are plain memory; cross-thread access is coordinated by the
// pipeline protocol described in the module docs.
unsafe impl Send for ThreadStateContainer {}
unsafe impl Sync for ThreadStateContainer {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_same_thread_gets_same_strip() {
        let mut tls = ThreadStateContainer::new();
        tls.reset(64, None, None, std::ptr::null_mut());
        let a = tls.access_current_thread_state();
        let b = tls.access_current_thread_state();
        assert_eq!(a, b);
        assert_eq!(tls.state_count(), 1);
    }

    #[test]
    fn test_init_runs_once_per_thread() {
        let inits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&inits);
        let mut tls = ThreadStateContainer::new();
        tls.reset(
            8,
            Some(Box::new(move |_, state| {
                counter.fetch_add(1, Ordering::SeqCst);
                unsafe { state.cast::<u64>().write(42) };
            })),
            None,
            std::ptr::null_mut(),
        );
        let ptr = tls.access_current_thread_state();
        tls.access_current_thread_state();
        assert_eq!(inits.load(Ordering::SeqCst), 1);
        assert_eq!(unsafe { ptr.cast::<u64>().read() }, 42);
    }

    #[test]
    fn test_reset_tears_down() {
        let drops = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&drops);
        let mut tls = ThreadStateContainer::new();
        tls.reset(
            8,
            None,
            Some(Box::new(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
            std::ptr::null_mut(),
        );
        tls.access_current_thread_state();
        tls.reset(8, None, None, std::ptr::null_mut());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(tls.state_count(), 0);
    }

    #[test]
    fn test_distinct_threads_get_distinct_strips() {
        let mut tls = ThreadStateContainer::new();
        tls.reset(16, None, None, std::ptr::null_mut());
        let tls = Arc::new(tls);
        let main_ptr = tls.access_current_thread_state() as usize;
        let tls2 = Arc::clone(&tls);
        let other_ptr = std::thread::spawn(move || tls2.access_current_thread_state() as usize)
            .join()
            .expect("join");
        assert_ne!(main_ptr, other_ptr);
        assert_eq!(tls.state_count(), 2);
    }
}
