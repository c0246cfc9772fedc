//! Process-wide scanner registry. Scanner ids are opaque handles returned
//! to the client on `create_scanner` and presented on every subsequent
//! `fetch_scanblock`; the map tracks idle time so a maintenance tick can
//! purge scanners the client abandoned without closing.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Opaque server-side cursor. Scan implementation details live elsewhere;
/// the map only needs enough to resume and to report idleness.
#[derive(Debug, Clone, Default)]
pub struct ScannerState {
    pub resume_key: Vec<u8>,
    pub cells_returned: u64,
}

struct Entry {
    scanner: ScannerState,
    range_id: String,
    table_id: String,
    last_access_millis: AtomicU64,
}

/// Registry mapping scanner id to its cursor, owning range, and table.
#[derive(Default)]
pub struct ScannerMap {
    next_id: AtomicU64,
    entries: DashMap<u64, Entry>,
}

impl ScannerMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(
        &self,
        scanner: ScannerState,
        range_id: impl Into<String>,
        table_id: impl Into<String>,
        now_millis: u64,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.entries.insert(
            id,
            Entry {
                scanner,
                range_id: range_id.into(),
                table_id: table_id.into(),
                last_access_millis: AtomicU64::new(now_millis),
            },
        );
        id
    }

    /// Fetches the scanner's current state and refreshes its last-access
    /// time. Returns `None` if the id is unknown (closed or purged).
    #[must_use]
    pub fn get(&self, id: u64, now_millis: u64) -> Option<(ScannerState, String, String)> {
        let entry = self.entries.get(&id)?;
        entry.last_access_millis.store(now_millis, Ordering::SeqCst);
        Some((entry.scanner.clone(), entry.range_id.clone(), entry.table_id.clone()))
    }

    pub fn remove(&self, id: u64) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Drops every scanner whose last access predates `now_millis -
    /// max_idle_ms`, returning the ids removed.
    pub fn purge_expired(&self, now_millis: u64, max_idle_ms: u64) -> Vec<u64> {
        let expired: Vec<u64> = self
            .entries
            .iter()
            .filter(|e| now_millis.saturating_sub(e.last_access_millis.load(Ordering::SeqCst)) > max_idle_ms)
            .map(|e| *e.key())
            .collect();
        for id in &expired {
            self.entries.remove(id);
        }
        expired
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
