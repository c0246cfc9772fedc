//! Master configuration. A plain `Default`-implementing struct, in the
//! style of a `ServerConfig`/`NetworkConfig` pair -- no external
//! config-file crate.

use std::time::Duration;

/// Configuration keys from the external `Hypertable.*` option table, plus
/// the ambient worker-pool/timeout knobs a production master needs.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// Hyperspace root (`Hypertable.Directory`).
    pub hyperspace_directory: String,
    /// Delay before `Recover` begins after a lock release
    /// (`Hypertable.Failover.GracePeriod`).
    pub failover_grace_period: Duration,
    /// Drives garbage-collection target minima
    /// (`Hypertable.RangeServer.Range.SplitSize`).
    pub range_split_size_bytes: u64,
    /// GC trigger fraction
    /// (`Hypertable.RangeServer.AccessGroup.GarbageThreshold.Percentage`).
    pub garbage_threshold_percentage: f64,
    /// Number of Operation Processor workers.
    pub processor_worker_count: usize,
    /// Back-off between DropTable/SuspendMaintenance RPC retries.
    pub rpc_retry_backoff: Duration,
    /// Maximum clock skew tolerated when validating a revision proposal.
    pub max_clock_skew: Duration,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            hyperspace_directory: "/hypertable".to_string(),
            failover_grace_period: Duration::from_secs(30),
            range_split_size_bytes: 256 * 1024 * 1024,
            garbage_threshold_percentage: 0.15,
            processor_worker_count: 4,
            rpc_retry_backoff: Duration::from_secs(5),
            max_clock_skew: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = MasterConfig::default();
        assert!(config.processor_worker_count > 0);
        assert!(config.garbage_threshold_percentage > 0.0 && config.garbage_threshold_percentage < 1.0);
    }
}
