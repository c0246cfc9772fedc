//! Log-replay barrier: gates cell-access requests during range-server
//! startup until the relevant commit-log replay phase has caught up.
//!
//! Replay proceeds in four phases, each strictly gating the next: the root
//! METADATA range, the rest of METADATA, the system tables, then user
//! tables. A request only needs to wait on the phase its table belongs to.

use std::time::{Duration, Instant};

use tokio::sync::Notify;

/// Which replay phase a table's requests wait on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Root,
    Metadata,
    System,
    User,
}

/// Classifies a table path into the replay phase that gates it.
#[must_use]
pub fn classify(table: &str) -> Phase {
    if table == "/sys/RS_METRICS" || table.starts_with("/sys/root/") {
        Phase::Root
    } else if table == "/sys/METADATA" {
        Phase::Metadata
    } else if table.starts_with("/sys/") {
        Phase::System
    } else {
        Phase::User
    }
}

#[derive(Default)]
struct Gate {
    ready: std::sync::atomic::AtomicBool,
    notify: Notify,
}

impl Gate {
    fn set(&self) {
        self.ready.store(true, std::sync::atomic::Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn is_ready(&self) -> bool {
        self.ready.load(std::sync::atomic::Ordering::SeqCst)
    }

    async fn wait(&self, deadline: Instant) -> bool {
        loop {
            if self.is_ready() {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return self.is_ready();
            }
            let notified = self.notify.notified();
            tokio::select! {
                () = notified => {}
                () = tokio::time::sleep(remaining) => return self.is_ready(),
            }
        }
    }
}

/// Four independently-settable gates, one per replay phase.
#[derive(Default)]
pub struct ReplayBarrier {
    root: Gate,
    metadata: Gate,
    system: Gate,
    user: Gate,
}

impl ReplayBarrier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn gate(&self, phase: Phase) -> &Gate {
        match phase {
            Phase::Root => &self.root,
            Phase::Metadata => &self.metadata,
            Phase::System => &self.system,
            Phase::User => &self.user,
        }
    }

    /// Marks a phase as having finished replay, releasing every request
    /// currently waiting on it (and every future one immediately).
    pub fn set_phase_ready(&self, phase: Phase) {
        self.gate(phase).set();
    }

    #[must_use]
    pub fn is_phase_ready(&self, phase: Phase) -> bool {
        self.gate(phase).is_ready()
    }

    /// Waits for the phase gating `table` to open, up to `expire_time`.
    /// Returns `false` on timeout.
    pub async fn wait(&self, expire_time: Duration, table: &str, _range: &str) -> bool {
        let deadline = Instant::now() + expire_time;
        self.gate(classify(table)).wait(deadline).await
    }
}
