//! `Recover`: created by the Hyperspace watcher when a range server's lock
//! is released while it was registered. `INITIAL -> WAIT_BARRIER ->
//! REASSIGN_RANGES -> COMPLETE`.
//!
//! `WAIT_BARRIER` advances a deadline `Failover.GracePeriod` milliseconds
//! into the future and re-persists without transitioning until the deadline
//! passes, giving the server a chance to re-register before its ranges are
//! handed to a replacement.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::context::Context;
use crate::operation::{Operation, OperationPayload, OperationState};
use crate::operations::Outcome;

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as u64
}

pub async fn execute(op: &mut Operation, ctx: &Context) -> Outcome {
    let OperationPayload::Recover { location, barrier_deadline_millis } = &mut op.payload else {
        op.fail("recover: payload mismatch");
        return Outcome::Terminal;
    };

    let state_label = match &op.state {
        OperationState::InProgress(s) => s.clone(),
        _ => "INITIAL".to_string(),
    };

    match state_label.as_str() {
        "INITIAL" => {
            *barrier_deadline_millis =
                now_millis() + ctx.config.failover_grace_period.as_millis() as u64;
            op.transition("WAIT_BARRIER");
            Outcome::Persisted
        }
        "WAIT_BARRIER" => {
            if now_millis() < *barrier_deadline_millis {
                // Stay put; the processor re-enqueues this operation after
                // its back-off interval rather than busy-polling here.
                Outcome::Persisted
            } else {
                op.transition("REASSIGN_RANGES");
                Outcome::Persisted
            }
        }
        "REASSIGN_RANGES" => {
            match ctx.collaborators.range_servers.load_range(location, "*").await {
                Ok(()) | Err(gridtable_types::error::GridError::TableNotFound(_)) => {
                    op.complete();
                    Outcome::Terminal
                }
                Err(e) => {
                    op.fail(e.to_string());
                    Outcome::Terminal
                }
            }
        }
        other => {
            op.fail(format!("recover: unknown state {other}"));
            Outcome::Terminal
        }
    }
}
