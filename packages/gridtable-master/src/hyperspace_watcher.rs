//! Reacts to range-server lock lifecycle events delivered by Hyperspace.
//! Tracks liveness the way the source's deadline-based failure detector
//! tracks heartbeats, except here liveness is observed directly through
//! lock acquisition/release rather than inferred from missed pings.
//!
//! `lock_acquired` admits a `RegisterServerBlocker` so a concurrent
//! `RegisterServer` operation for the same location defers until this
//! watcher later confirms the server actually went away. `lock_released`
//! admits a `Recover` operation and clears that obstruction, closing the
//! race between a server dying and its lock being re-acquired.

use dashmap::DashSet;

use crate::operation::{OperationKind, OperationPayload};
use crate::operations::register_server_blocker::label_for;
use crate::processor::Processor;

pub struct HyperspaceWatcher<'a> {
    processor: &'a Processor,
    registered: DashSet<String>,
}

impl<'a> HyperspaceWatcher<'a> {
    #[must_use]
    pub fn new(processor: &'a Processor) -> Self {
        Self { processor, registered: DashSet::new() }
    }

    /// A range server acquired its exclusive lock at
    /// `<toplevel>/servers/<location>`.
    pub fn lock_acquired(&self, location: &str) {
        if !self.registered.insert(location.to_string()) {
            return;
        }
        let _ = self.processor.add_operation(
            OperationKind::RegisterServerBlocker,
            OperationPayload::RegisterServerBlocker { location: location.to_string() },
            vec![],
            vec![],
            vec![],
        );
    }

    /// The lock at `<toplevel>/servers/<location>` was released, meaning
    /// the server died, was evicted, or cleanly shut down.
    pub fn lock_released(&self, location: &str) {
        if self.registered.remove(location).is_none() {
            return;
        }
        let _ = self.processor.add_operation(
            OperationKind::Recover,
            OperationPayload::Recover { location: location.to_string(), barrier_deadline_millis: 0 },
            vec![],
            vec![],
            vec![],
        );
        self.processor.unblock(&label_for(location));
    }

    #[must_use]
    pub fn is_registered(&self, location: &str) -> bool {
        self.registered.contains(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::Collaborators;
    use crate::config::MasterConfig;
    use crate::context::Context;
    use crate::dependency_graph::DependencyGraph;
    use crate::mml::Mml;
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
    async fn lock_released_unblocks_and_schedules_recover() {
        let (ctx, _dir) = test_ctx();
        let processor = Processor::spawn(ctx, Vec::new());
        let watcher = HyperspaceWatcher::new(&processor);

        watcher.lock_acquired("rs1");
        assert!(watcher.is_registered("rs1"));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        watcher.lock_released("rs1");
        assert!(!watcher.is_registered("rs1"));

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        processor.shutdown().await;
    }

    #[tokio::test]
    async fn duplicate_lock_acquired_is_idempotent() {
        let (ctx, _dir) = test_ctx();
        let processor = Processor::spawn(ctx, Vec::new());
        let watcher = HyperspaceWatcher::new(&processor);
        watcher.lock_acquired("rs1");
        watcher.lock_acquired("rs1");
        assert!(watcher.is_registered("rs1"));
        processor.shutdown().await;
    }
}
