//! `RegisterServerBlocker`: an ephemeral operation inserted on
//! `lock_acquired`. Obstructs the label `"RegisterServerBlocker <location>"`
//! so any concurrent `RegisterServer` operation defers until the matching
//! `lock_released` handler arrives and explicitly removes the obstruction
//! via [`crate::dependency_graph::DependencyGraph::unblock`], closing the
//! race where a server dies and returns before its death is fully
//! processed.
//!
//! Implementation note: the operation self-parks by depending on the same
//! label it obstructs. Since an operation never counts as its own
//! obstructor-cleared dependency, it stays off the ready frontier for as
//! long as the label remains obstructed -- until `unblock` clears it
//! externally, at which point the next `execute()` call completes it.

use crate::context::Context;
use crate::operation::{Operation, OperationPayload, OperationState};
use crate::operations::Outcome;

#[must_use]
pub fn label_for(location: &str) -> String {
    format!("RegisterServerBlocker {location}")
}

pub async fn execute(op: &mut Operation, _ctx: &Context) -> Outcome {
    let OperationPayload::RegisterServerBlocker { location } = &op.payload else {
        op.fail("register_server_blocker: payload mismatch");
        return Outcome::Terminal;
    };
    let label = label_for(location);

    let state_label = match &op.state {
        OperationState::InProgress(s) => s.clone(),
        _ => "INITIAL".to_string(),
    };

    match state_label.as_str() {
        "INITIAL" => {
            op.ephemeral = true;
            op.obstructions = vec![label.clone()];
            op.dependencies = vec![label];
            op.transition("BLOCKING");
            Outcome::Persisted
        }
        "BLOCKING" => {
            op.obstructions.clear();
            op.dependencies.clear();
            op.complete();
            Outcome::Terminal
        }
        other => {
            op.fail(format!("register_server_blocker: unknown state {other}"));
            Outcome::Terminal
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
    use crate::operation::OperationKind;
    use crate::reference_manager::ReferenceManager;

    fn ctx() -> (Context, tempfile::TempDir) {
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
    async fn stays_parked_until_graph_reports_ready_after_unblock() {
        let (ctx, _dir) = ctx();
        let mut op = Operation::new(
            1,
            OperationKind::RegisterServerBlocker,
            OperationPayload::RegisterServerBlocker { location: "S".into() },
        );
        execute(&mut op, &ctx).await;
        ctx.dependency_graph
            .insert(op.id, op.dependencies.clone(), op.obstructions.clone(), op.exclusivities.clone())
            .unwrap();
        assert!(!ctx.dependency_graph.ready_frontier().contains(&op.id));

        ctx.dependency_graph.unblock(&label_for("S"));
        assert!(ctx.dependency_graph.ready_frontier().contains(&op.id));

        let outcome = execute(&mut op, &ctx).await;
        assert!(matches!(outcome, Outcome::Terminal));
        assert_eq!(op.state, OperationState::Complete);
    }
}
