//! Ambient global state (MML writer, name map, Hyperspace handle,
//! processor, collaborators) accessed from every operation. Modelled as a
//! single immutable handle passed by reference; every piece requiring
//! mutation is a standalone actor protected by its own mutex, in the style
//! of a `ServiceContext`/`ClusterState` pair.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::collaborators::Collaborators;
use crate::config::MasterConfig;
use crate::dependency_graph::DependencyGraph;
use crate::mml::Mml;
use crate::reference_manager::ReferenceManager;

/// Handle threaded through every operation's `execute()` call.
#[derive(Clone)]
pub struct Context {
    pub config: Arc<MasterConfig>,
    pub mml: Arc<Mml>,
    pub dependency_graph: Arc<DependencyGraph>,
    pub reference_manager: Arc<ReferenceManager>,
    pub collaborators: Collaborators,
    /// Monotonic id source for sub-operations an FSM constructs directly
    /// (e.g. CreateTable's index sub-ops, RecreateIndexTables' drop/create
    /// sub-ops). The top-level `Processor::add_operation` path allocates
    /// from the same counter, bumped past any replayed id at startup.
    op_id_counter: Arc<AtomicU64>,
}

impl Context {
    #[must_use]
    pub fn new(
        config: MasterConfig,
        mml: Mml,
        dependency_graph: DependencyGraph,
        reference_manager: ReferenceManager,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            config: Arc::new(config),
            mml: Arc::new(mml),
            dependency_graph: Arc::new(dependency_graph),
            reference_manager: Arc::new(reference_manager),
            collaborators,
            op_id_counter: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Allocates a fresh operation id.
    pub fn alloc_op_id(&self) -> u64 {
        self.op_id_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Raises the id counter's floor so ids allocated after a replay never
    /// collide with a replayed operation's id.
    pub fn bump_op_id_floor(&self, floor: u64) {
        self.op_id_counter.fetch_max(floor, Ordering::Relaxed);
    }
}
