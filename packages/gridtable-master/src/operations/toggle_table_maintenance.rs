//! `ToggleTableMaintenance`: flips a table's Hyperspace `maintenance_disabled`
//! attribute. Issued standalone by operators and as a sub-operation of
//! `RecreateIndexTables`, which brackets its index rebuild with a
//! disable/enable pair so range servers reject client traffic against the
//! index tables mid-rebuild.

use crate::context::Context;
use crate::operation::{Operation, OperationPayload};
use crate::operations::Outcome;

pub async fn execute(op: &mut Operation, ctx: &Context) -> Outcome {
    let OperationPayload::ToggleTableMaintenance { name, disable } = &op.payload else {
        op.fail("toggle_table_maintenance: payload mismatch");
        return Outcome::Terminal;
    };
    match ctx.collaborators.hyperspace.set_maintenance_disabled(name, *disable).await {
        Ok(()) => {
            op.complete();
            Outcome::Terminal
        }
        Err(e) => {
            op.fail(e.to_string());
            Outcome::Terminal
        }
    }
}

#[must_use]
pub fn new_payload(name: impl Into<String>, disable: bool) -> OperationPayload {
    OperationPayload::ToggleTableMaintenance { name: name.into(), disable }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::Collaborators;
    use crate::operation::OperationKind;

    #[tokio::test]
    async fn disables_then_reenables_maintenance() {
        let ctx_collab = Collaborators::fake();
        let (ctx, _dir) = test_ctx(ctx_collab.clone());

        let mut off = Operation::new(1, OperationKind::ToggleTableMaintenance, new_payload("/a/t", true));
        execute(&mut off, &ctx).await;
        assert!(off.state.is_terminal());
        assert!(ctx_collab.hyperspace.get_maintenance_disabled("/a/t").await.unwrap());

        let mut on = Operation::new(2, OperationKind::ToggleTableMaintenance, new_payload("/a/t", false));
        execute(&mut on, &ctx).await;
        assert!(!ctx_collab.hyperspace.get_maintenance_disabled("/a/t").await.unwrap());
    }

    fn test_ctx(collaborators: Collaborators) -> (Context, tempfile::TempDir) {
        use crate::config::MasterConfig;
        use crate::dependency_graph::DependencyGraph;
        use crate::mml::Mml;
        use crate::reference_manager::ReferenceManager;

        let dir = tempfile::tempdir().unwrap();
        let mml = Mml::open(dir.path().join("mml.log")).unwrap();
        let ctx = Context::new(
            MasterConfig::default(),
            mml,
            DependencyGraph::new(),
            ReferenceManager::new(),
            collaborators,
        );
        (ctx, dir)
    }
}
