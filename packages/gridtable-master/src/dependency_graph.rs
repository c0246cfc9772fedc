//! Bipartite label graph between live operations: each publishes
//! (obstructions, exclusivities) and consumes (dependencies). The ready
//! frontier is recomputed on every insert/remove and published lock-free
//! via `ArcSwap`, a snapshot-publication pattern suited to
//! infrequently-changing, frequently-read state.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;

use crate::error::MasterError;

#[derive(Debug, Clone)]
struct OpMeta {
    dependencies: Vec<String>,
    obstructions: Vec<String>,
    exclusivities: Vec<String>,
    insertion_seq: u64,
}

/// Tracks dependencies/obstructions/exclusivities between live operations
/// and computes the ready set: an operation with no live obstructor on any
/// of its dependency labels and no exclusivity conflict with another live
/// operation.
pub struct DependencyGraph {
    meta: DashMap<u64, OpMeta>,
    /// label -> set of op ids currently exporting that obstruction.
    obstructors: DashMap<String, HashSet<u64>>,
    /// label -> op id currently holding that exclusivity.
    exclusive_holders: DashMap<String, u64>,
    seq: AtomicU64,
    ready: ArcSwap<Vec<u64>>,
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyGraph {
    #[must_use]
    pub fn new() -> Self {
        Self {
            meta: DashMap::new(),
            obstructors: DashMap::new(),
            exclusive_holders: DashMap::new(),
            seq: AtomicU64::new(0),
            ready: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Registers an operation's labels. Enforces invariant (ii):
    /// `exclusivities` disjoint across all live operations.
    pub fn insert(
        &self,
        op_id: u64,
        dependencies: Vec<String>,
        obstructions: Vec<String>,
        exclusivities: Vec<String>,
    ) -> Result<(), MasterError> {
        for label in &exclusivities {
            if let Some(holder) = self.exclusive_holders.get(label) {
                if *holder != op_id {
                    return Err(MasterError::ExclusivityConflict(label.clone()));
                }
            }
        }
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        for label in &obstructions {
            self.obstructors.entry(label.clone()).or_default().insert(op_id);
        }
        for label in &exclusivities {
            self.exclusive_holders.insert(label.clone(), op_id);
        }
        self.meta.insert(
            op_id,
            OpMeta { dependencies, obstructions, exclusivities, insertion_seq: seq },
        );
        self.recompute();
        Ok(())
    }

    /// Removes an operation (it has completed or errored) and releases its
    /// published labels.
    pub fn remove(&self, op_id: u64) {
        if let Some((_, meta)) = self.meta.remove(&op_id) {
            for label in &meta.obstructions {
                if let Some(mut set) = self.obstructors.get_mut(label) {
                    set.remove(&op_id);
                }
            }
            for label in &meta.exclusivities {
                if self.exclusive_holders.get(label).is_some_and(|h| *h == op_id) {
                    self.exclusive_holders.remove(label);
                }
            }
        }
        self.recompute();
    }

    /// Removes a named obstruction ahead of natural completion -- used when
    /// a watcher event satisfies a condition externally (e.g.
    /// `RegisterServerBlocker`'s `lock_released` handler).
    pub fn unblock(&self, label: &str) {
        self.obstructors.remove(label);
        self.recompute();
    }

    fn is_ready(&self, op_id: u64, meta: &OpMeta) -> bool {
        for label in &meta.dependencies {
            if let Some(set) = self.obstructors.get(label) {
                if !set.is_empty() {
                    return false;
                }
            }
        }
        for label in &meta.exclusivities {
            if let Some(holder) = self.exclusive_holders.get(label) {
                if *holder != op_id {
                    return false;
                }
            }
        }
        true
    }

    fn recompute(&self) {
        let mut candidates: Vec<(u64, u64)> = self
            .meta
            .iter()
            .filter(|entry| self.is_ready(*entry.key(), entry.value()))
            .map(|entry| (entry.value().insertion_seq, *entry.key()))
            .collect();
        candidates.sort_unstable();
        let ready: Vec<u64> = candidates.into_iter().map(|(_, id)| id).collect();
        self.ready.store(Arc::new(ready));
    }

    /// The current ready frontier, FIFO-ordered by insertion sequence.
    #[must_use]
    pub fn ready_frontier(&self) -> Vec<u64> {
        (**self.ready.load()).clone()
    }

    #[must_use]
    pub fn contains(&self, op_id: u64) -> bool {
        self.meta.contains_key(&op_id)
    }
}
