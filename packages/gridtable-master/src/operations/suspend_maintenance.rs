//! `SuspendMaintenance`: `INITIAL -> SUSPEND_MAINTENANCE_HYPERSPACE ->
//! SUSPEND_SCAN_METADATA -> SUSPEND_MAINTENANCE_RANGESERVER ->
//! RESUME_MAINTENANCE_HYPERSPACE -> RESUME_SCAN_METADATA ->
//! RESUME_MAINTENANCE_RANGESERVER -> COMPLETE`.
//!
//! Hyperspace carries a persistent `maintenance_disabled` attribute so the
//! suspension survives a master restart. Range-server requests are retried
//! with a five-second back-off on partial failure (driven here by
//! `MasterConfig::rpc_retry_backoff`, honoured by the processor's
//! re-enqueue delay rather than a blocking sleep inside `execute`).

use crate::context::Context;
use crate::operation::{Operation, OperationPayload, OperationState};
use crate::operations::Outcome;

pub async fn execute(op: &mut Operation, ctx: &Context) -> Outcome {
    let OperationPayload::SuspendMaintenance { name, id: _, label: _, resume, servers, completed } =
        &mut op.payload
    else {
        op.fail("suspend_maintenance: payload mismatch");
        return Outcome::Terminal;
    };

    let state_label = match &op.state {
        OperationState::InProgress(s) => s.clone(),
        _ => "INITIAL".to_string(),
    };

    let (hyperspace_state, scan_state, rangeserver_state, next_after_rangeserver) = if *resume {
        (
            "RESUME_MAINTENANCE_HYPERSPACE",
            "RESUME_SCAN_METADATA",
            "RESUME_MAINTENANCE_RANGESERVER",
            None,
        )
    } else {
        (
            "SUSPEND_MAINTENANCE_HYPERSPACE",
            "SUSPEND_SCAN_METADATA",
            "SUSPEND_MAINTENANCE_RANGESERVER",
            Some(()),
        )
    };

    match state_label.as_str() {
        "INITIAL" => {
            op.transition(hyperspace_state);
            Outcome::Persisted
        }
        s if s == hyperspace_state => {
            let disabled = !*resume;
            match ctx.collaborators.hyperspace.set_maintenance_disabled(name, disabled).await {
                Ok(()) => {
                    op.transition(scan_state);
                    Outcome::Persisted
                }
                Err(e) => {
                    op.fail(e.to_string());
                    Outcome::Terminal
                }
            }
        }
        s if s == scan_state => {
            let pending: Vec<String> =
                servers.iter().filter(|srv| !completed.contains(srv)).cloned().collect();
            op.dependencies = pending.iter().map(|srv| format!("server:{srv}")).collect();
            op.transition(rangeserver_state);
            Outcome::Persisted
        }
        s if s == rangeserver_state => {
            let disabled = !*resume;
            let pending: Vec<String> =
                servers.iter().filter(|srv| !completed.contains(srv)).cloned().collect();
            let mut any_error = false;
            for server in &pending {
                match ctx.collaborators.range_servers.set_maintenance_disabled(server, disabled).await {
                    Ok(()) => completed.push(server.clone()),
                    Err(_) => any_error = true,
                }
            }
            if any_error {
                op.transition(scan_state);
                Outcome::Persisted
            } else if next_after_rangeserver.is_some() {
                // Suspend path complete; this operation's COMPLETE state
                // represents "suspended", resumed explicitly via a second
                // SuspendMaintenance operation with `resume = true`.
                op.complete();
                Outcome::Terminal
            } else {
                op.complete();
                Outcome::Terminal
            }
        }
        other => {
            op.fail(format!("suspend_maintenance: unknown state {other}"));
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

    fn new_op(resume: bool) -> Operation {
        Operation::new(
            1,
            OperationKind::SuspendMaintenance,
            OperationPayload::SuspendMaintenance {
                name: "/a/t".into(),
                id: Some("7".into()),
                label: "suspend:/a/t".into(),
                resume,
                servers: vec!["rs1".into()],
                completed: vec![],
            },
        )
    }

    #[tokio::test]
    async fn suspend_then_resume_both_complete() {
        let (ctx, _dir) = ctx();
        let mut suspend = new_op(false);
        loop {
            if matches!(execute(&mut suspend, &ctx).await, Outcome::Terminal) {
                break;
            }
        }
        assert_eq!(suspend.state, OperationState::Complete);
        assert!(ctx.collaborators.hyperspace.get_maintenance_disabled("/a/t").await.unwrap());

        let mut resume = new_op(true);
        loop {
            if matches!(execute(&mut resume, &ctx).await, Outcome::Terminal) {
                break;
            }
        }
        assert_eq!(resume.state, OperationState::Complete);
        assert!(!ctx.collaborators.hyperspace.get_maintenance_disabled("/a/t").await.unwrap());
    }
}
