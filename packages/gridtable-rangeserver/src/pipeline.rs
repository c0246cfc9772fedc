//! The range-server write path: qualify → commit → respond, each its own
//! worker task connected by bounded `tokio::sync::mpsc` channels so a slow
//! downstream stage applies back-pressure to the one upstream of it,
//! using a worker-pool-plus-channel handoff shape.
//!
//! Qualify resolves each request to a range, assigns a revision (rejecting
//! regressions), and re-encodes the key for the family's time order.
//! Commit coalesces adjacent qualified batches up to the configured byte
//! ceiling into one write per range, applies them to the cell cache, and
//! hands the result to respond. A range found blocked mid-qualify is
//! redirected to its transfer log instead of the commit log; the caller
//! still observes success once that write is durable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use gridtable_types::key::CellKey;
use gridtable_types::revision::{Revision, RevisionClock};
use gridtable_types::schema::TimeOrder;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::config::RangeServerConfig;
use crate::error::RangeError;
use crate::storage::{request_cell_key, PipelineCollaborators};
use crate::update_rec_range::UpdateContext;

/// Resolves which time order applies to a column family, so qualify can
/// re-encode the key the way [`gridtable_types::key::transform_key`]
/// expects. Schema lookups live at the master; the range server only needs
/// this one projection of it.
pub trait TimeOrderLookup: Send + Sync {
    fn time_order(&self, column_family_id: u32) -> TimeOrder;
}

/// Fake that reports every family as ascending, for pipelines exercised
/// without a real schema store attached.
#[derive(Debug, Default)]
pub struct AscendingTimeOrder;

impl TimeOrderLookup for AscendingTimeOrder {
    fn time_order(&self, _column_family_id: u32) -> TimeOrder {
        TimeOrder::Ascending
    }
}

/// Per-range outcome of a submitted batch.
#[derive(Debug, Clone)]
pub enum RangeOutcome {
    Applied(usize),
    Redirected(usize),
    Failed(Arc<RangeError>),
}

/// The result handed back to the submitter of a batch.
#[derive(Debug, Clone, Default)]
pub struct BatchResponse {
    pub per_range: HashMap<String, RangeOutcome>,
}

impl BatchResponse {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.per_range.values().all(|o| !matches!(o, RangeOutcome::Failed(_)))
    }
}

struct QualifyJob {
    context: UpdateContext,
    respond_to: oneshot::Sender<BatchResponse>,
}

struct CommitJob {
    to_commit: HashMap<String, Vec<(CellKey, Vec<u8>)>>,
    outcomes: HashMap<String, RangeOutcome>,
    respond_to: oneshot::Sender<BatchResponse>,
}

impl CommitJob {
    fn byte_len(&self) -> usize {
        self.to_commit.values().flatten().map(|(_, v)| v.len()).sum()
    }
}

struct Shared {
    collaborators: PipelineCollaborators,
    time_order: Arc<dyn TimeOrderLookup>,
    config: RangeServerConfig,
    range_clocks: dashmap::DashMap<String, SyncMutex<RevisionClock>>,
    fatal: AtomicBool,
    in_flight: AtomicUsize,
    drained: Notify,
}

/// The three-stage update pipeline. `submit` is the single external entry
/// point; it returns once the respond stage has produced a [`BatchResponse`]
/// or the pipeline has hit a fatal commit-log failure.
pub struct UpdatePipeline {
    shared: Arc<Shared>,
    qualify_tx: mpsc::Sender<QualifyJob>,
    handles: Vec<JoinHandle<()>>,
}

impl UpdatePipeline {
    #[must_use]
    pub fn spawn(
        collaborators: PipelineCollaborators,
        time_order: Arc<dyn TimeOrderLookup>,
        config: RangeServerConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            collaborators,
            time_order,
            range_clocks: dashmap::DashMap::new(),
            fatal: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
            config: config.clone(),
        });

        let (qualify_tx, qualify_rx) = mpsc::channel(1024);
        let (commit_tx, commit_rx) = mpsc::channel(config.commit_queue_count_bound);

        let mut handles = Vec::with_capacity(2);
        handles.push({
            let shared = Arc::clone(&shared);
            tokio::spawn(async move { run_qualify(shared, qualify_rx, commit_tx).await })
        });
        handles.push({
            let shared = Arc::clone(&shared);
            tokio::spawn(async move { run_commit(shared, commit_rx).await })
        });

        Self { shared, qualify_tx, handles }
    }

    /// Submits a batch and awaits its response. Blocks (async) while the
    /// commit stage is saturated, providing the pipeline's back-pressure.
    pub async fn submit(&self, context: UpdateContext) -> Result<BatchResponse, RangeError> {
        self.shared.in_flight.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        let result = async {
            self.qualify_tx
                .send(QualifyJob { context, respond_to: tx })
                .await
                .map_err(|_| anyhow::anyhow!("pipeline shut down"))?;
            rx.await.map_err(|_| anyhow::anyhow!("pipeline dropped response channel"))
        }
        .await
        .map_err(RangeError::from);
        if self.shared.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.shared.drained.notify_waiters();
        }
        result
    }

    /// Cooperative shutdown: waits for in-flight batches to drain, then
    /// aborts the worker tasks.
    pub async fn shutdown(mut self) {
        while self.shared.in_flight.load(Ordering::SeqCst) > 0 {
            self.shared.drained.notified().await;
        }
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

async fn run_qualify(shared: Arc<Shared>, mut rx: mpsc::Receiver<QualifyJob>, commit_tx: mpsc::Sender<CommitJob>) {
    while let Some(job) = rx.recv().await {
        let mut to_commit: HashMap<String, Vec<(CellKey, Vec<u8>)>> = HashMap::new();
        let mut outcomes: HashMap<String, RangeOutcome> = HashMap::new();
        let mut redirected_counts: HashMap<String, usize> = HashMap::new();

        for request in &job.context.requests {
            let Some(range_id) = shared.collaborators.range_map.resolve(&request.row_key) else {
                warn!(row = ?request.row_key, "no range for key");
                continue;
            };

            if shared.collaborators.range_map.is_blocked(&range_id) {
                let key = request_cell_key(request, Revision::MIN);
                let key = gridtable_types::key::transform_key(
                    key,
                    shared.time_order.time_order(request.column_family_id),
                );
                if let Err(e) = shared
                    .collaborators
                    .transfer_log
                    .append(&range_id, &[(key, request.value.clone())])
                    .await
                {
                    outcomes.insert(range_id, RangeOutcome::Failed(Arc::new(e)));
                } else {
                    *redirected_counts.entry(range_id).or_insert(0) += 1;
                }
                continue;
            }

            let proposed = {
                let clock = shared
                    .range_clocks
                    .entry(range_id.clone())
                    .or_insert_with(|| SyncMutex::new(RevisionClock::new(shared.config.max_clock_skew.as_millis() as u64)));
                let next = clock.lock().next();
                next
            };
            let last_applied = shared.collaborators.range_map.last_applied_revision(&range_id);
            let clock = shared.range_clocks.get(&range_id).unwrap();
            if let Err(_e) = clock.lock().validate(proposed, last_applied) {
                outcomes.insert(
                    range_id,
                    RangeOutcome::Failed(Arc::new(RangeError::Grid(
                        gridtable_types::error::GridError::TimestampOrderError {
                            attempted: proposed.as_i64(),
                            last: last_applied.map_or(0, |r| r.as_i64()),
                        },
                    ))),
                );
                continue;
            }

            let key = request_cell_key(request, proposed);
            let key =
                gridtable_types::key::transform_key(key, shared.time_order.time_order(request.column_family_id));
            to_commit.entry(range_id).or_default().push((key, request.value.clone()));
        }

        for (range_id, count) in redirected_counts {
            outcomes.insert(range_id, RangeOutcome::Redirected(count));
        }

        if commit_tx.send(CommitJob { to_commit, outcomes, respond_to: job.respond_to }).await.is_err() {
            return;
        }
    }
}

async fn run_commit(shared: Arc<Shared>, mut rx: mpsc::Receiver<CommitJob>) {
    while let Some(first) = rx.recv().await {
        if shared.fatal.load(Ordering::SeqCst) {
            let _ = first.respond_to.send(fatal_response(&first.outcomes));
            continue;
        }

        let mut group = vec![first];
        let mut total_bytes = group[0].byte_len();
        while total_bytes < shared.config.update_coalesce_limit_bytes && group.len() < 64 {
            match rx.try_recv() {
                Ok(next) => {
                    total_bytes += next.byte_len();
                    group.push(next);
                }
                Err(_) => break,
            }
        }

        let mut merged: HashMap<String, Vec<(CellKey, Vec<u8>)>> = HashMap::new();
        for job in &group {
            for (range_id, entries) in &job.to_commit {
                merged.entry(range_id.clone()).or_default().extend(entries.iter().cloned());
            }
        }

        let mut committed: HashMap<String, usize> = HashMap::new();
        let mut fatal_error: Option<Arc<RangeError>> = None;
        for (range_id, entries) in &merged {
            match shared.collaborators.commit_log.append(range_id, entries).await {
                Ok(()) => {
                    shared.collaborators.cell_cache.apply(range_id, entries);
                    if let Some((key, _)) = entries.iter().max_by_key(|(k, _)| k.revision) {
                        shared.collaborators.range_map.record_applied_revision(range_id, key.revision);
                    }
                    committed.insert(range_id.clone(), entries.len());
                }
                Err(e) => {
                    error!(range = %range_id, error = %e, "commit log write failed fatally");
                    fatal_error = Some(Arc::new(e));
                    break;
                }
            }
        }

        if let Some(e) = fatal_error {
            shared.fatal.store(true, Ordering::SeqCst);
            for job in group {
                let _ = job.respond_to.send(fatal_response_with(&job.outcomes, e.clone()));
            }
            return;
        }

        for job in group {
            let mut response = BatchResponse { per_range: job.outcomes };
            for (range_id, count) in &committed {
                if job.to_commit.contains_key(range_id) {
                    response.per_range.insert(range_id.clone(), RangeOutcome::Applied(*count));
                }
            }
            let _ = job.respond_to.send(response);
        }
    }
}

fn fatal_response(existing: &HashMap<String, RangeOutcome>) -> BatchResponse {
    BatchResponse { per_range: existing.clone() }
}

fn fatal_response_with(existing: &HashMap<String, RangeOutcome>, e: Arc<RangeError>) -> BatchResponse {
    let mut per_range = existing.clone();
    per_range.insert("*".to_string(), RangeOutcome::Failed(e));
    BatchResponse { per_range }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryRangeMap;
    use crate::update_rec_range::UpdateRequest;
    use gridtable_types::key::RowKeyRange;

    fn collaborators_with_ranges() -> (PipelineCollaborators, Arc<InMemoryRangeMap>) {
        let range_map = Arc::new(InMemoryRangeMap::new());
        range_map.add_range("r1", RowKeyRange { start: b"a".to_vec(), end: Some(b"m".to_vec()) });
        range_map.add_range("r2", RowKeyRange { start: b"m".to_vec(), end: None });
        let collaborators = PipelineCollaborators {
            range_map: range_map.clone() as Arc<dyn crate::storage::RangeMap>,
            commit_log: Arc::new(crate::storage::InMemoryCommitLog::new()),
            cell_cache: Arc::new(crate::storage::InMemoryCellCache::new()),
            transfer_log: Arc::new(crate::storage::InMemoryTransferLog::new()),
        };
        (collaborators, range_map)
    }

    fn request(row: &[u8]) -> UpdateRequest {
        UpdateRequest {
            row_key: row.to_vec(),
            column_family_id: 1,
            qualifier: b"q".to_vec(),
            value: b"v".to_vec(),
        }
    }

    #[tokio::test]
    async fn batch_applied_to_single_range_commits() {
        let (collaborators, _) = collaborators_with_ranges();
        let pipeline =
            UpdatePipeline::spawn(collaborators, Arc::new(AscendingTimeOrder), RangeServerConfig::default());
        let ctx = UpdateContext { requests: vec![request(b"b"), request(b"c")] };
        let response = pipeline.submit(ctx).await.unwrap();
        assert!(response.is_ok());
        assert!(matches!(response.per_range.get("r1"), Some(RangeOutcome::Applied(2))));
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn blocked_range_redirects_to_transfer_log() {
        let (collaborators, range_map) = collaborators_with_ranges();
        range_map.set_blocked("r2", true);
        let commit_log = Arc::new(crate::storage::InMemoryCommitLog::new());
        let transfer_log = Arc::new(crate::storage::InMemoryTransferLog::new());
        let collaborators = PipelineCollaborators {
            commit_log: commit_log.clone(),
            transfer_log: transfer_log.clone(),
            ..collaborators
        };
        let pipeline =
            UpdatePipeline::spawn(collaborators, Arc::new(AscendingTimeOrder), RangeServerConfig::default());

        let ctx = UpdateContext { requests: vec![request(b"b"), request(b"z")] };
        let response = pipeline.submit(ctx).await.unwrap();
        assert!(response.is_ok());
        assert!(matches!(response.per_range.get("r1"), Some(RangeOutcome::Applied(1))));
        assert!(matches!(response.per_range.get("r2"), Some(RangeOutcome::Redirected(1))));
        assert_eq!(transfer_log.entry_count("r2"), 1);
        assert_eq!(commit_log.entry_count("r2"), 0);
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn fatal_commit_log_failure_surfaces_to_caller() {
        let (collaborators, _) = collaborators_with_ranges();
        let commit_log = Arc::new(crate::storage::InMemoryCommitLog::new());
        commit_log.simulate_fatal_failure();
        let collaborators = PipelineCollaborators { commit_log: commit_log.clone(), ..collaborators };
        let pipeline =
            UpdatePipeline::spawn(collaborators, Arc::new(AscendingTimeOrder), RangeServerConfig::default());

        let ctx = UpdateContext { requests: vec![request(b"b")] };
        let response = pipeline.submit(ctx).await.unwrap();
        assert!(!response.is_ok());
        pipeline.shutdown().await;
    }

    use proptest::prelude::*;
    use std::sync::atomic::AtomicU64;

    struct ArbitraryClock(Arc<AtomicU64>);
    impl gridtable_types::revision::ClockSource for ArbitraryClock {
        fn now_millis(&self) -> u64 {
            self.0.load(Ordering::Relaxed)
        }
    }

    proptest! {
        /// P6 (Revision monotonicity): regardless of how the wall clock
        /// jitters between calls -- holds still, jumps forward, even
        /// reports a time already seen -- every `next()` from the same
        /// `RevisionClock` strictly exceeds the one before it, which is
        /// what qualify relies on to assign strictly increasing per-range
        /// revisions across successful commits.
        #[test]
        fn revision_clock_next_is_always_strictly_increasing(
            readings in prop::collection::vec(0u64..10_000, 1..200)
        ) {
            let millis = Arc::new(AtomicU64::new(0));
            let mut clock = RevisionClock::with_clock_source(60_000, Box::new(ArbitraryClock(millis.clone())));
            let mut last: Option<Revision> = None;
            for reading in readings {
                millis.store(reading, Ordering::Relaxed);
                let next = clock.next();
                if let Some(prev) = last {
                    prop_assert!(next > prev, "revision did not strictly increase: {prev} -> {next}");
                }
                last = Some(next);
            }
        }
    }
}
