//! Revision clock: a Hybrid-Logical-Clock-derived generator for the
//! monotonically increasing per-range revisions the update pipeline stamps
//! onto every qualified mutation.
//!
//! A revision combines physical wall-clock time with a logical counter so
//! that revisions generated within the same millisecond still order
//! strictly. Unlike a full HLC, a `RevisionClock` never merges a remote
//! revision into its own state -- range revisions are assigned locally by
//! whichever range server owns the range, not causally synchronized across
//! nodes -- but it does enforce a clock-skew bound against a supplied
//! reference time, matching the qualify stage's `max_clock_skew` rule.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// A strictly ordered revision: physical millis since epoch, then a logical
/// counter for same-millisecond ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Revision {
    pub millis: u64,
    pub counter: u32,
}

impl Revision {
    pub const MIN: Revision = Revision { millis: 0, counter: 0 };

    /// Packs the revision into a single `i64` suitable for the MML wire
    /// format and for range-map comparisons.
    #[must_use]
    pub fn as_i64(&self) -> i64 {
        ((self.millis as i64) << 20) | i64::from(self.counter & 0xF_FFFF)
    }
}

impl Ord for Revision {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.millis
            .cmp(&other.millis)
            .then_with(|| self.counter.cmp(&other.counter))
    }
}

impl PartialOrd for Revision {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.millis, self.counter)
    }
}

/// Abstraction over the wall clock, so tests can drive the revision clock
/// deterministically.
pub trait ClockSource: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// Default clock source backed by the system clock.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before unix epoch")
            .as_millis() as u64
    }
}

/// Error returned when a caller-supplied revision would violate the clock
/// skew bound or monotonicity invariant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RevisionError {
    #[error("assigned revision would not exceed last applied revision")]
    NotMonotone,
    #[error("reference time exceeds local clock by more than the allowed skew")]
    ClockSkewExceeded,
}

/// Generates strictly increasing [`Revision`]s, bounded by a configured
/// maximum clock skew against the local wall clock.
pub struct RevisionClock {
    last_millis: u64,
    last_counter: u32,
    max_clock_skew_ms: u64,
    clock_source: Box<dyn ClockSource>,
}

impl RevisionClock {
    #[must_use]
    pub fn new(max_clock_skew_ms: u64) -> Self {
        Self::with_clock_source(max_clock_skew_ms, Box::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock_source(max_clock_skew_ms: u64, clock_source: Box<dyn ClockSource>) -> Self {
        Self {
            last_millis: 0,
            last_counter: 0,
            max_clock_skew_ms,
            clock_source,
        }
    }

    /// Generates the next revision, guaranteed to strictly exceed every
    /// revision previously returned by this clock.
    pub fn next(&mut self) -> Revision {
        let now = self.clock_source.now_millis();
        if now > self.last_millis {
            self.last_millis = now;
            self.last_counter = 0;
        } else {
            self.last_counter += 1;
        }
        Revision {
            millis: self.last_millis,
            counter: self.last_counter,
        }
    }

    /// Validates a revision proposed by a caller against the last applied
    /// revision for a range and the configured clock-skew bound, without
    /// advancing local clock state. Used by the qualify stage to reject
    /// regressions with `TIMESTAMP_ORDER_ERROR`.
    pub fn validate(&self, proposed: Revision, last_applied: Option<Revision>) -> Result<(), RevisionError> {
        if let Some(last) = last_applied {
            if proposed <= last {
                return Err(RevisionError::NotMonotone);
            }
        }
        let now = self.clock_source.now_millis();
        if proposed.millis > now.saturating_add(self.max_clock_skew_ms) {
            return Err(RevisionError::ClockSkewExceeded);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    struct FixedClock(Arc<AtomicU64>);
    impl ClockSource for FixedClock {
        fn now_millis(&self) -> u64 {
            self.0.load(Ordering::Relaxed)
        }
    }

    #[test]
    fn next_is_strictly_increasing_within_same_millis() {
        let fixed = Arc::new(AtomicU64::new(1_000));
        let mut clock = RevisionClock::with_clock_source(60_000, Box::new(FixedClock(fixed)));
        let a = clock.next();
        let b = clock.next();
        let c = clock.next();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn next_resets_counter_when_wall_clock_advances() {
        let fixed = Arc::new(AtomicU64::new(1_000));
        let mut clock = RevisionClock::with_clock_source(60_000, Box::new(FixedClock(fixed.clone())));
        let a = clock.next();
        fixed.store(2_000, Ordering::Relaxed);
        let b = clock.next();
        assert!(a < b);
        assert_eq!(b.counter, 0);
    }

    #[test]
    fn validate_rejects_non_monotone_revision() {
        let fixed = Arc::new(AtomicU64::new(1_000));
        let clock = RevisionClock::with_clock_source(60_000, Box::new(FixedClock(fixed)));
        let last = Revision { millis: 1_000, counter: 5 };
        let proposed = Revision { millis: 1_000, counter: 3 };
        assert_eq!(clock.validate(proposed, Some(last)), Err(RevisionError::NotMonotone));
    }

    #[test]
    fn validate_rejects_revision_beyond_skew_bound() {
        let fixed = Arc::new(AtomicU64::new(1_000));
        let clock = RevisionClock::with_clock_source(100, Box::new(FixedClock(fixed)));
        let proposed = Revision { millis: 5_000, counter: 0 };
        assert_eq!(clock.validate(proposed, None), Err(RevisionError::ClockSkewExceeded));
    }

    #[test]
    fn validate_accepts_valid_revision() {
        let fixed = Arc::new(AtomicU64::new(1_000));
        let clock = RevisionClock::with_clock_source(60_000, Box::new(FixedClock(fixed)));
        let last = Revision { millis: 1_000, counter: 1 };
        let proposed = Revision { millis: 1_000, counter: 2 };
        assert!(clock.validate(proposed, Some(last)).is_ok());
    }

    #[test]
    fn ordering_compares_millis_then_counter() {
        let a = Revision { millis: 1, counter: 9 };
        let b = Revision { millis: 2, counter: 0 };
        assert!(a < b);
    }
}
