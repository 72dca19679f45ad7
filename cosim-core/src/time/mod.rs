//! ## cosim-core::time
//! **Virtual clock driving the event loop**

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared virtual time in nanoseconds.
///
/// Clones observe the same counter, so statistics readers can sample the
/// simulation time without going through the scheduler.
#[derive(Clone, Debug, Default)]
pub struct VirtualClock {
    offset: Arc<AtomicU64>, // Nanoseconds
}

impl VirtualClock {
    pub fn new(start_ns: u64) -> Self {
        Self {
            offset: Arc::new(AtomicU64::new(start_ns)),
        }
    }

    #[inline]
    pub fn now_ns(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }

    /// Moves the clock forward to `ts_ns`. Virtual time never runs backwards.
    pub fn advance_to(&self, ts_ns: u64) {
        self.offset.fetch_max(ts_ns, Ordering::AcqRel);
    }
}
