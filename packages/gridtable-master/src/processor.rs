//! The Operation Processor: a fixed pool of async workers draining the
//! dependency graph's ready frontier. A single dispatcher task watches the
//! frontier and feeds ready operation ids to the worker pool over a
//! channel; each worker executes one operation's state machine to its next
//! persisted or terminal point, then releases its claim so the dispatcher
//! can redispatch it once ready again.
//!
//! Shutdown follows the in-flight-guard pattern: `shutdown()` stops the
//! dispatcher from admitting new work and waits for every worker's
//! in-flight count to reach zero before returning, so no operation is
//! interrupted mid-`execute`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use gridtable_types::hash::HashCode;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::operation::Operation;
use crate::operations::{self, Outcome};

struct Shared {
    ctx: Context,
    index: DashMap<u64, HashCode>,
    claimed: DashSet<u64>,
    running: AtomicBool,
    in_flight: AtomicUsize,
    drained: Notify,
}

/// Owns the dispatcher and worker tasks. Dropping it without calling
/// [`Processor::shutdown`] abandons the background tasks; callers that care
/// about graceful drain should always call `shutdown`.
pub struct Processor {
    shared: Arc<Shared>,
    ready_notify: Arc<Notify>,
    dispatcher: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl Processor {
    /// Spawns the dispatcher and `ctx.config.processor_worker_count` worker
    /// tasks. Operations already in the dependency graph (e.g. replayed from
    /// the Metalog at startup) are picked up on the first frontier poll.
    #[must_use]
    pub fn spawn(ctx: Context, seed: Vec<(Operation, HashCode)>) -> Self {
        let worker_count = ctx.config.processor_worker_count.max(1);
        let max_id = seed.iter().map(|(op, _)| op.id).max().unwrap_or(0);
        ctx.bump_op_id_floor(max_id + 1);
        let shared = Arc::new(Shared {
            ctx,
            index: DashMap::new(),
            claimed: DashSet::new(),
            running: AtomicBool::new(true),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
        });
        for (op, hash) in seed {
            shared.index.insert(op.id, hash);
        }

        let ready_notify = Arc::new(Notify::new());
        let (tx, rx) = mpsc::channel::<u64>(1024);
        let rx = Arc::new(Mutex::new(rx));

        let dispatcher = {
            let shared = Arc::clone(&shared);
            let ready_notify = Arc::clone(&ready_notify);
            let tx = tx.clone();
            tokio::spawn(async move { run_dispatcher(shared, ready_notify, tx).await })
        };

        let mut workers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let shared = Arc::clone(&shared);
            let rx = Arc::clone(&rx);
            workers.push(tokio::spawn(async move { run_worker(shared, rx).await }));
        }

        Self { shared, ready_notify, dispatcher: Some(dispatcher), workers }
    }

    /// Registers a fresh top-level operation: allocates its id, inserts it
    /// into the reference manager and dependency graph, persists its
    /// initial state, and wakes the dispatcher.
    pub fn add_operation(
        &self,
        kind: crate::operation::OperationKind,
        payload: crate::operation::OperationPayload,
        dependencies: Vec<String>,
        obstructions: Vec<String>,
        exclusivities: Vec<String>,
    ) -> Result<u64, crate::error::MasterError> {
        let id = self.shared.ctx.alloc_op_id();
        let mut op = Operation::new(id, kind, payload);
        op.dependencies = dependencies;
        op.obstructions = obstructions;
        op.exclusivities = exclusivities;
        self.shared.ctx.dependency_graph.insert(
            id,
            op.dependencies.clone(),
            op.obstructions.clone(),
            op.exclusivities.clone(),
        )?;
        self.shared.ctx.mml.record_state(&op)?;
        info!(op_id = id, kind = ?kind, "operation registered");
        let hash = self.shared.ctx.reference_manager.add(op);
        self.shared.index.insert(id, hash);
        self.ready_notify.notify_one();
        Ok(id)
    }

    /// Clears an externally-satisfied obstruction label (e.g. a Hyperspace
    /// watcher event) and wakes the dispatcher.
    pub fn unblock(&self, label: &str) {
        debug!(label, "obstruction label cleared");
        self.shared.ctx.dependency_graph.unblock(label);
        self.ready_notify.notify_one();
    }

    #[must_use]
    pub fn operation(&self, id: u64) -> Option<Operation> {
        let hash = *self.shared.index.get(&id)?;
        self.shared.ctx.reference_manager.get(hash)
    }

    /// Stops admitting new work and waits until no worker is mid-`execute`.
    pub async fn shutdown(mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.ready_notify.notify_waiters();
        while self.shared.in_flight.load(Ordering::SeqCst) > 0 {
            self.shared.drained.notified().await;
        }
        if let Some(handle) = self.dispatcher.take() {
            handle.abort();
        }
        for handle in self.workers.drain(..) {
            handle.abort();
        }
    }
}

async fn run_dispatcher(shared: Arc<Shared>, ready_notify: Arc<Notify>, tx: mpsc::Sender<u64>) {
    loop {
        if !shared.running.load(Ordering::SeqCst) {
            return;
        }
        let frontier = shared.ctx.dependency_graph.ready_frontier();
        let mut dispatched = false;
        for id in frontier {
            if shared.claimed.insert(id) {
                dispatched = true;
                if tx.send(id).await.is_err() {
                    return;
                }
            }
        }
        if !dispatched {
            ready_notify.notified().await;
        }
    }
}

async fn run_worker(shared: Arc<Shared>, rx: Arc<Mutex<mpsc::Receiver<u64>>>) {
    loop {
        let id = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(id) = id else { return };
        shared.in_flight.fetch_add(1, Ordering::SeqCst);
        process_one(&shared, id).await;
        shared.claimed.remove(&id);
        if shared.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            shared.drained.notify_waiters();
        }
    }
}

async fn process_one(shared: &Shared, id: u64) {
    let Some(hash) = shared.index.get(&id).map(|h| *h) else {
        warn!(op_id = id, "dispatched id has no reference-manager entry");
        return;
    };
    let Some(mut op) = shared.ctx.reference_manager.get(hash) else { return };

    let outcome = operations::execute(&mut op, &shared.ctx).await;

    match outcome {
        Outcome::Persisted => {
            debug!(op_id = op.id, state = ?op.state, "operation transitioned");
            shared.ctx.reference_manager.with_mut(hash, |slot| *slot = op.clone());
            let _ = shared.ctx.mml.record_state(&op);
            shared.ctx.dependency_graph.remove(op.id);
            let _ = shared.ctx.dependency_graph.insert(
                op.id,
                op.dependencies.clone(),
                op.obstructions.clone(),
                op.exclusivities.clone(),
            );
        }
        Outcome::Yielded(sub_ops) => {
            info!(op_id = op.id, sub_op_count = sub_ops.len(), "operation yielded sub-operations");
            let mut deps: HashSet<String> = op.dependencies.iter().cloned().collect();
            let mut batch_refs: Vec<Operation> = Vec::with_capacity(sub_ops.len());
            for sub in sub_ops {
                deps.extend(sub.obstructions.iter().cloned());
                let sub_id = sub.id;
                let _ = shared.ctx.dependency_graph.insert(
                    sub_id,
                    sub.dependencies.clone(),
                    sub.obstructions.clone(),
                    sub.exclusivities.clone(),
                );
                let sub_hash = shared.ctx.reference_manager.add(sub.clone());
                shared.index.insert(sub_id, sub_hash);
                batch_refs.push(sub);
            }
            op.dependencies = deps.into_iter().collect();
            shared.ctx.reference_manager.with_mut(hash, |slot| *slot = op.clone());
            let mut refs: Vec<&Operation> = vec![&op];
            refs.extend(batch_refs.iter());
            let _ = shared.ctx.mml.record_batch(&refs, &[]);
            shared.ctx.dependency_graph.remove(op.id);
            let _ = shared.ctx.dependency_graph.insert(
                op.id,
                op.dependencies.clone(),
                op.obstructions.clone(),
                op.exclusivities.clone(),
            );
        }
        Outcome::Terminal => {
            info!(op_id = op.id, state = ?op.state, "operation reached terminal state");
            shared.ctx.reference_manager.with_mut(hash, |slot| *slot = op.clone());
            let _ = shared.ctx.mml.tombstone(op.id);
            shared.ctx.dependency_graph.remove(op.id);
            shared.ctx.reference_manager.remove(hash);
            shared.index.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::Collaborators;
    use crate::config::MasterConfig;
    use crate::dependency_graph::DependencyGraph;
    use crate::mml::Mml;
    use crate::operation::{OperationKind, OperationPayload};
    use crate::reference_manager::ReferenceManager;

    fn test_ctx() -> (Context, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mml = Mml::open(dir.path().join("mml.log")).unwrap();
        let ctx = Context::new(
            MasterConfig::default(),
            mml,
            DependencyGraph::new(),
            ReferenceManager::new(),
            Collaborators::fake(),
        );
        (ctx, dir)
    }

    #[tokio::test]
    async fn register_server_blocker_completes_after_unblock() {
        let (ctx, _dir) = test_ctx();
        let processor = Processor::spawn(ctx, Vec::new());
        let id = processor
            .add_operation(
                OperationKind::RegisterServerBlocker,
                OperationPayload::RegisterServerBlocker { location: "rs1".into() },
                vec![],
                vec![],
                vec![],
            )
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(processor.operation(id).is_some());

        processor.unblock(&crate::operations::register_server_blocker::label_for("rs1"));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(processor.operation(id).is_none());
        processor.shutdown().await;
    }

    #[tokio::test]
    async fn create_table_drains_to_completion() {
        let (ctx, _dir) = test_ctx();
        let schema = gridtable_types::schema::Schema::new();
        let processor = Processor::spawn(ctx, Vec::new());
        let id = processor
            .add_operation(
                OperationKind::CreateTable,
                OperationPayload::CreateTable {
                    name: "/a/t".into(),
                    schema: serde_json::to_string(&schema).unwrap(),
                    id: None,
                    location: Some("rs1".into()),
                    parts: gridtable_types::schema::TableParts::PRIMARY.0,
                    idempotent: false,
                },
                vec![],
                vec![],
                vec!["/a/t".into()],
            )
            .unwrap();

        for _ in 0..20 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            if processor.operation(id).is_none() {
                break;
            }
        }
        assert!(processor.operation(id).is_none());
        processor.shutdown().await;
    }
}
