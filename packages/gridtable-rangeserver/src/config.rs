//! Range-server configuration, matching the master's plain-struct
//! `Default`-implementing convention rather than a config-file crate.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RangeServerConfig {
    /// Commit stage coalescing ceiling (`update_coalesce_limit`): adjacent
    /// qualified contexts are grouped into a single fsync up to this many
    /// bytes.
    pub update_coalesce_limit_bytes: usize,
    /// Commit queue back-pressure bound; qualify blocks once exceeded.
    pub commit_queue_count_bound: usize,
    /// Maximum clock skew tolerated when qualify assigns a revision
    /// (`Hypertable.RangeServer.Range.SplitSize`'s sibling knob for time).
    pub max_clock_skew: Duration,
    /// Drives Garbage Tracker target minima
    /// (`Hypertable.RangeServer.Range.SplitSize`).
    pub range_split_size_bytes: u64,
    /// GC trigger fraction
    /// (`Hypertable.RangeServer.AccessGroup.GarbageThreshold.Percentage`).
    pub garbage_threshold_percentage: f64,
    /// Scanner Map idle eviction bound.
    pub scanner_idle_timeout: Duration,
    /// Per-process memory ceiling for admission control.
    pub memory_limit_bytes: u64,
}

impl Default for RangeServerConfig {
    fn default() -> Self {
        Self {
            update_coalesce_limit_bytes: 4 * 1024 * 1024,
            commit_queue_count_bound: 256,
            max_clock_skew: Duration::from_secs(60),
            range_split_size_bytes: 256 * 1024 * 1024,
            garbage_threshold_percentage: 0.15,
            scanner_idle_timeout: Duration::from_secs(10 * 60),
            memory_limit_bytes: 1024 * 1024 * 1024,
        }
    }
}
