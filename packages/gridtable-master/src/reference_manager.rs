//! Process-wide registry from `hash_code(op) -> Operation`, modelling the
//! source's reference-counted cyclic pointers as a weak-index pattern:
//! operations live exclusively here, keyed by a stable 64-bit hash-code;
//! every other reference (a parent's persisted `subop_hash`, a dependency
//! label) is a copy of that hash-code.

use dashmap::DashMap;
use gridtable_types::hash::HashCode;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::operation::Operation;

/// A single entry: the operation plus its approval mask, tracked
/// independently so `remove` can check it without taking a write lock on
/// the operation itself.
struct Entry {
    operation: RwLock<Operation>,
}

/// Registry of long-lived operations keyed by hash-code. `remove` is only
/// honoured once the operation's `remove_approval_mask` is zero and it has
/// been `mark_for_removal`'d; otherwise it is a silent no-op, matching the
/// source's deferred-destruction semantics.
#[derive(Default)]
pub struct ReferenceManager {
    entries: DashMap<u64, Arc<Entry>>,
}

impl ReferenceManager {
    #[must_use]
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    pub fn add(&self, operation: Operation) -> HashCode {
        let hash = operation.hash_code();
        self.entries.insert(hash, Arc::new(Entry { operation: RwLock::new(operation) }));
        HashCode(hash)
    }

    #[must_use]
    pub fn get(&self, hash: HashCode) -> Option<Operation> {
        self.entries.get(&hash.0).map(|e| e.operation.read().clone())
    }

    /// Applies `f` to the live operation in place, returning its result.
    pub fn with_mut<T>(&self, hash: HashCode, f: impl FnOnce(&mut Operation) -> T) -> Option<T> {
        self.entries.get(&hash.0).map(|e| f(&mut e.operation.write()))
    }

    /// Removes the entry if, and only if, it is marked for removal and its
    /// approval mask has been fully cleared. Returns `true` if the entry
    /// was actually removed.
    pub fn remove(&self, hash: HashCode) -> bool {
        let Some(entry) = self.entries.get(&hash.0) else { return false };
        let ready = {
            let op = entry.operation.read();
            op.marked_for_removal && op.remove_approval_mask == 0
        };
        drop(entry);
        if ready {
            self.entries.remove(&hash.0);
        }
        ready
    }

    /// Clears a single approver's bit from the approval mask, then attempts
    /// removal. `bit` is a caller-defined approver identity (e.g. MML
    /// tombstone-written=0x1, reference-manager-side observers=0x2...).
    pub fn approve_removal(&self, hash: HashCode, bit: u32) -> bool {
        if let Some(entry) = self.entries.get(&hash.0) {
            let mut op = entry.operation.write();
            op.remove_approval_mask &= !bit;
        }
        self.remove(hash)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{OperationKind, OperationPayload};

    fn op(id: u64) -> Operation {
        Operation::new(id, OperationKind::DropTable, OperationPayload::None)
    }

    #[test]
    fn add_then_get_round_trips() {
        let rm = ReferenceManager::new();
        let hash = rm.add(op(1));
        assert_eq!(rm.get(hash).unwrap().id, 1);
    }

    #[test]
    fn remove_is_noop_until_marked_and_approved() {
        let rm = ReferenceManager::new();
        let o = op(1);
        let hash = rm.add(o);
        // Not marked for removal yet.
        assert!(!rm.remove(hash));
        assert!(rm.get(hash).is_some());

        rm.with_mut(hash, |op| {
            op.marked_for_removal = true;
            op.remove_approval_mask = 0b11;
        });
        // Marked but approval mask non-zero.
        assert!(!rm.remove(hash));
        assert!(rm.get(hash).is_some());
    }

    #[test]
    fn approve_removal_clears_bits_then_removes() {
        let rm = ReferenceManager::new();
        let hash = rm.add(op(1));
        rm.with_mut(hash, |op| {
            op.marked_for_removal = true;
            op.remove_approval_mask = 0b11;
        });
        assert!(!rm.approve_removal(hash, 0b01));
        assert!(rm.get(hash).is_some());
        assert!(rm.approve_removal(hash, 0b10));
        assert!(rm.get(hash).is_none());
    }

    #[test]
    fn unknown_hash_code_operations_are_noops() {
        let rm = ReferenceManager::new();
        assert!(!rm.remove(HashCode(12345)));
        assert!(rm.get(HashCode(12345)).is_none());
    }
}
