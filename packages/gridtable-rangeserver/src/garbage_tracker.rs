//! Adaptive per-access-group garbage estimator. Answers one question per
//! maintenance tick -- is a major compaction worth running now -- by
//! tracking two self-adjusting targets: a byte target for delete- and
//! max-versions-driven garbage, and a time target for TTL-driven garbage.

/// Configuration an access group is created with; the adaptive fields
/// (`accum_data_target`, `elapsed_target`) start at their minima and grow
/// or shrink as `adjust_targets` observes compaction outcomes.
#[derive(Debug, Clone)]
pub struct GarbageTrackerConfig {
    pub garbage_threshold: f64,
    pub elapsed_target_minimum: u64,
    pub accum_data_target_minimum: u64,
    pub min_ttl: u64,
    pub max_ttl: u64,
    pub have_max_versions: bool,
}

/// Tracks one access group's garbage accumulation since its last major
/// compaction.
///
/// Invariants: every numeric field is non-negative (enforced by type),
/// `accum_data_target >= accum_data_target_minimum`,
/// `elapsed_target >= elapsed_target_minimum`, and
/// `min_ttl <= max_ttl` unless both are zero.
#[derive(Debug, Clone)]
pub struct AccessGroupGarbageTracker {
    pub garbage_threshold: f64,
    pub elapsed_target: u64,
    pub elapsed_target_minimum: u64,
    pub accum_data_target: u64,
    pub accum_data_target_minimum: u64,
    pub last_reset_time: u64,
    pub last_reset_disk_usage: u64,
    pub current_disk_usage: u64,
    pub stored_deletes: u64,
    pub stored_expirable: u64,
    pub min_ttl: u64,
    pub max_ttl: u64,
    pub have_max_versions: bool,
    pub in_memory: u64,
}

impl AccessGroupGarbageTracker {
    /// Builds a tracker with both adaptive targets pinned at their minima,
    /// rejecting a `min_ttl > max_ttl` configuration.
    pub fn new(config: GarbageTrackerConfig) -> Result<Self, &'static str> {
        if config.min_ttl > config.max_ttl && config.max_ttl != 0 {
            return Err("min_ttl must not exceed max_ttl unless max_ttl is zero");
        }
        Ok(Self {
            garbage_threshold: config.garbage_threshold,
            elapsed_target: config.elapsed_target_minimum,
            elapsed_target_minimum: config.elapsed_target_minimum,
            accum_data_target: config.accum_data_target_minimum,
            accum_data_target_minimum: config.accum_data_target_minimum,
            last_reset_time: 0,
            last_reset_disk_usage: 0,
            current_disk_usage: 0,
            stored_deletes: 0,
            stored_expirable: 0,
            min_ttl: config.min_ttl,
            max_ttl: config.max_ttl,
            have_max_versions: config.have_max_versions,
            in_memory: 0,
        })
    }

    #[must_use]
    pub fn footprint(&self) -> u64 {
        self.current_disk_usage + self.in_memory
    }

    #[must_use]
    pub fn bytes_since_reset(&self) -> u64 {
        self.footprint().saturating_sub(self.last_reset_disk_usage)
    }

    /// Whether a major compaction is worth running at `now` (seconds since
    /// epoch).
    #[must_use]
    pub fn check_needed(&self, now: u64) -> bool {
        let byte_triggered = (self.stored_deletes > 0 || self.have_max_versions)
            && self.bytes_since_reset() >= self.accum_data_target;

        let footprint = self.footprint();
        let time_triggered = self.min_ttl > 0
            && footprint > 0
            && (self.stored_expirable as f64 / footprint as f64) >= self.garbage_threshold
            && now.saturating_sub(self.last_reset_time) >= self.elapsed_target;

        byte_triggered || time_triggered
    }

    /// Updates both adaptive targets after a maintenance tick observes
    /// `garbage` bytes of garbage out of `total` bytes examined. If the
    /// observed fraction came in under threshold the targets double (we
    /// compacted too eagerly); otherwise they contract toward the estimate
    /// that would have produced exactly `garbage_threshold` garbage.
    pub fn adjust_targets(&mut self, now: u64, total: u64, garbage: u64) {
        let observed_fraction = if total == 0 { 0.0 } else { garbage as f64 / total as f64 };

        if observed_fraction < self.garbage_threshold {
            self.accum_data_target =
                self.accum_data_target.saturating_mul(2).max(self.accum_data_target_minimum);
            self.elapsed_target = self.elapsed_target.saturating_mul(2).max(self.elapsed_target_minimum);
            return;
        }

        if observed_fraction > 0.0 {
            let estimate_bytes = (total as f64 * self.garbage_threshold / observed_fraction) as u64;
            self.accum_data_target = estimate_bytes.max(self.accum_data_target_minimum);

            let elapsed = now.saturating_sub(self.last_reset_time).max(1);
            let estimate_elapsed = (elapsed as f64 * self.garbage_threshold / observed_fraction) as u64;
            self.elapsed_target = estimate_elapsed.max(self.elapsed_target_minimum);
        }
    }

    /// Records the post-compaction baseline: accumulation since this point
    /// starts from zero again.
    pub fn reset(&mut self, t: u64) {
        self.last_reset_time = t;
        self.last_reset_disk_usage = self.footprint();
        self.stored_deletes = 0;
        self.stored_expirable = 0;
    }
}
