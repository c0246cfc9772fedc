//! Concrete operation state machines. Each kind's `execute()` performs one
//! or more transitions but must return after persisting its new state or
//! after completing; it may also yield new sub-operations for the
//! processor to drain into the active set.

pub mod alter_table;
pub mod create_table;
pub mod drop_table;
pub mod recover;
pub mod recreate_index_tables;
pub mod register_server_blocker;
pub mod suspend_maintenance;
pub mod toggle_table_maintenance;

use crate::context::Context;
use crate::operation::{Operation, OperationKind};

/// Result of a single `execute()` call, consumed by the Operation
/// Processor (see [`crate::processor`]).
pub enum Outcome {
    /// The operation persisted a new non-terminal state; re-enqueue once
    /// its dependencies are satisfied again.
    Persisted,
    /// The operation appended sub-operations; the processor inserts them
    /// into the active set and adds their obstruction labels to the
    /// parent's dependencies.
    Yielded(Vec<Operation>),
    /// The operation reached `Complete` or `Error`.
    Terminal,
}

/// Dispatches to the per-kind state machine. A tagged variant over kinds
/// with one dispatcher, rather than virtual `execute`/`encode`/`decode`
/// per kind.
pub async fn execute(op: &mut Operation, ctx: &Context) -> Outcome {
    let outcome = match op.kind {
        OperationKind::CreateTable => create_table::execute(op, ctx).await,
        OperationKind::DropTable => drop_table::execute(op, ctx).await,
        OperationKind::AlterTable => alter_table::execute(op, ctx).await,
        OperationKind::RecreateIndexTables => recreate_index_tables::execute(op, ctx).await,
        OperationKind::SuspendMaintenance => suspend_maintenance::execute(op, ctx).await,
        OperationKind::Recover => recover::execute(op, ctx).await,
        OperationKind::RegisterServerBlocker => register_server_blocker::execute(op, ctx).await,
        OperationKind::ToggleTableMaintenance => toggle_table_maintenance::execute(op, ctx).await,
        OperationKind::RegisterServer | OperationKind::Status | OperationKind::TimedBarrier => {
            op.complete();
            Outcome::Terminal
        }
    };
    if op.state.is_terminal() {
        Outcome::Terminal
    } else {
        outcome
    }
}
