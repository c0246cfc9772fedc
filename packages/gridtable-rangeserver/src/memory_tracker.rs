//! Per-process memory accounting consulted by admission control before a
//! batch is allowed into the qualify stage, or a scan result is buffered.

use std::sync::atomic::{AtomicI64, Ordering};

use gridtable_types::error::GridError;

use crate::error::RangeError;

/// Tracks bytes reserved against a fixed ceiling. `reserve` is the
/// admission check; callers that give up the memory (a batch finishes, a
/// scan closes) must `release` the same amount.
#[derive(Debug)]
pub struct MemoryTracker {
    used: AtomicI64,
    limit_bytes: u64,
}

impl MemoryTracker {
    #[must_use]
    pub fn new(limit_bytes: u64) -> Self {
        Self { used: AtomicI64::new(0), limit_bytes }
    }

    /// Reserves `bytes` against the limit, failing without mutating state
    /// if doing so would exceed it.
    pub fn reserve(&self, bytes: usize) -> Result<(), RangeError> {
        let delta = bytes as i64;
        let updated = self.used.fetch_add(delta, Ordering::SeqCst) + delta;
        if updated < 0 || updated as u64 > self.limit_bytes {
            self.used.fetch_sub(delta, Ordering::SeqCst);
            return Err(RangeError::Grid(GridError::InvalidOperation(format!(
                "memory tracker: reserving {bytes} bytes would exceed the {}-byte limit",
                self.limit_bytes
            ))));
        }
        Ok(())
    }

    pub fn release(&self, bytes: usize) {
        self.used.fetch_sub(bytes as i64, Ordering::SeqCst);
    }

    #[must_use]
    pub fn current_usage(&self) -> u64 {
        self.used.load(Ordering::SeqCst).max(0) as u64
    }

    #[must_use]
    pub fn limit_bytes(&self) -> u64 {
        self.limit_bytes
    }
}
