//! Collaborator interfaces the update pipeline writes through: the commit
//! log (durable, single-writer-per-range), the in-memory cell cache, the
//! per-range transfer log used when a range is blocked, and the live range
//! map that resolves row keys to range ids. Each ships an in-memory fake so
//! the pipeline can be exercised without a real CellStore or commit log.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use gridtable_types::key::{CellKey, RowKeyRange};
use gridtable_types::revision::Revision;
use parking_lot::Mutex;

use crate::error::RangeError;
use crate::update_rec_range::UpdateRequest;

/// Durable, append-only per-range write log. A write failure here is
/// treated as fatal by the commit stage: partial durability cannot be
/// distinguished from full durability without replaying the log.
#[async_trait]
pub trait CommitLog: Send + Sync {
    async fn append(&self, range_id: &str, entries: &[(CellKey, Vec<u8>)]) -> Result<(), RangeError>;
}

/// Per-access-group in-memory view of recently committed cells.
pub trait CellCache: Send + Sync {
    fn apply(&self, range_id: &str, entries: &[(CellKey, Vec<u8>)]);
    fn len(&self, range_id: &str) -> usize;
}

/// Redirect target for slices destined for a currently-blocked range (e.g.
/// mid-split). The caller observes success once durable here; replay onto
/// the eventual owning range happens out of band.
#[async_trait]
pub trait TransferLog: Send + Sync {
    async fn append(&self, range_id: &str, entries: &[(CellKey, Vec<u8>)]) -> Result<(), RangeError>;
}

/// The live mapping from row key to owning range, plus each range's
/// blocked/unblocked status and last-applied revision (for qualify's
/// monotonicity check).
pub trait RangeMap: Send + Sync {
    fn resolve(&self, row: &[u8]) -> Option<String>;
    fn is_blocked(&self, range_id: &str) -> bool;
    fn last_applied_revision(&self, range_id: &str) -> Option<Revision>;
    fn record_applied_revision(&self, range_id: &str, revision: Revision);
}

#[derive(Debug, Default)]
pub struct InMemoryCommitLog {
    entries: Mutex<Vec<(String, CellKey, Vec<u8>)>>,
    fail_next: Mutex<bool>,
}

impl InMemoryCommitLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn simulate_fatal_failure(&self) {
        *self.fail_next.lock() = true;
    }

    #[must_use]
    pub fn entry_count(&self, range_id: &str) -> usize {
        self.entries.lock().iter().filter(|(r, _, _)| r == range_id).count()
    }
}

#[async_trait]
impl CommitLog for InMemoryCommitLog {
    async fn append(&self, range_id: &str, entries: &[(CellKey, Vec<u8>)]) -> Result<(), RangeError> {
        let mut fail_next = self.fail_next.lock();
        if *fail_next {
            *fail_next = false;
            return Err(RangeError::CommitLogFatal(format!("simulated fatal write failure on {range_id}")));
        }
        drop(fail_next);
        let mut log = self.entries.lock();
        for (key, value) in entries {
            log.push((range_id.to_string(), key.clone(), value.clone()));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCellCache {
    by_range: DashMap<String, Vec<(CellKey, Vec<u8>)>>,
}

impl InMemoryCellCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CellCache for InMemoryCellCache {
    fn apply(&self, range_id: &str, entries: &[(CellKey, Vec<u8>)]) {
        self.by_range.entry(range_id.to_string()).or_default().extend_from_slice(entries);
    }

    fn len(&self, range_id: &str) -> usize {
        self.by_range.get(range_id).map_or(0, |v| v.len())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTransferLog {
    entries: DashMap<String, Vec<(CellKey, Vec<u8>)>>,
}

impl InMemoryTransferLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn entry_count(&self, range_id: &str) -> usize {
        self.entries.get(range_id).map_or(0, |v| v.len())
    }
}

#[async_trait]
impl TransferLog for InMemoryTransferLog {
    async fn append(&self, range_id: &str, entries: &[(CellKey, Vec<u8>)]) -> Result<(), RangeError> {
        self.entries.entry(range_id.to_string()).or_default().extend_from_slice(entries);
        Ok(())
    }
}

/// In-memory `RangeMap` fake. Tests configure row-key ranges and toggle a
/// range's blocked status to exercise the pipeline's transfer-log redirect
/// path.
#[derive(Debug, Default)]
pub struct InMemoryRangeMap {
    ranges: Mutex<Vec<(String, RowKeyRange)>>,
    blocked: Mutex<HashMap<String, bool>>,
    last_applied: Mutex<HashMap<String, Revision>>,
}

impl InMemoryRangeMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_range(&self, range_id: impl Into<String>, range: RowKeyRange) {
        self.ranges.lock().push((range_id.into(), range));
    }

    pub fn set_blocked(&self, range_id: &str, blocked: bool) {
        self.blocked.lock().insert(range_id.to_string(), blocked);
    }
}

impl RangeMap for InMemoryRangeMap {
    fn resolve(&self, row: &[u8]) -> Option<String> {
        self.ranges.lock().iter().find(|(_, r)| r.contains(row)).map(|(id, _)| id.clone())
    }

    fn is_blocked(&self, range_id: &str) -> bool {
        *self.blocked.lock().get(range_id).unwrap_or(&false)
    }

    fn last_applied_revision(&self, range_id: &str) -> Option<Revision> {
        self.last_applied.lock().get(range_id).copied()
    }

    fn record_applied_revision(&self, range_id: &str, revision: Revision) {
        self.last_applied.lock().insert(range_id.to_string(), revision);
    }
}

/// Bundle of pipeline collaborators, cloned cheaply via `Arc`.
#[derive(Clone)]
pub struct PipelineCollaborators {
    pub range_map: Arc<dyn RangeMap>,
    pub commit_log: Arc<dyn CommitLog>,
    pub cell_cache: Arc<dyn CellCache>,
    pub transfer_log: Arc<dyn TransferLog>,
}

impl PipelineCollaborators {
    #[must_use]
    pub fn fake() -> Self {
        Self {
            range_map: Arc::new(InMemoryRangeMap::new()),
            commit_log: Arc::new(InMemoryCommitLog::new()),
            cell_cache: Arc::new(InMemoryCellCache::new()),
            transfer_log: Arc::new(InMemoryTransferLog::new()),
        }
    }
}

#[must_use]
pub fn request_cell_key(request: &UpdateRequest, revision: Revision) -> CellKey {
    CellKey {
        row: request.row_key.clone(),
        column_family_id: request.column_family_id,
        qualifier: Some(request.qualifier.clone()),
        revision,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn commit_log_append_then_count() {
        let log = InMemoryCommitLog::new();
        let key = CellKey {
            row: b"a".to_vec(),
            column_family_id: 1,
            qualifier: None,
            revision: Revision { millis: 1, counter: 0 },
        };
        log.append("r1", &[(key, vec![1, 2, 3])]).await.unwrap();
        assert_eq!(log.entry_count("r1"), 1);
    }

    #[tokio::test]
    async fn commit_log_simulated_failure_is_fatal_kind() {
        let log = InMemoryCommitLog::new();
        log.simulate_fatal_failure();
        let err = log.append("r1", &[]).await.unwrap_err();
        assert!(matches!(err, RangeError::CommitLogFatal(_)));
    }

    #[test]
    fn range_map_resolves_row_within_range() {
        let map = InMemoryRangeMap::new();
        map.add_range("r1", RowKeyRange { start: b"a".to_vec(), end: Some(b"m".to_vec()) });
        map.add_range("r2", RowKeyRange { start: b"m".to_vec(), end: None });
        assert_eq!(map.resolve(b"b"), Some("r1".to_string()));
        assert_eq!(map.resolve(b"z"), Some("r2".to_string()));
    }
}
