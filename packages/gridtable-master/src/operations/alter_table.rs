//! `AlterTable`: `INITIAL -> VALIDATE_SCHEMA -> SCAN_METADATA ->
//! ISSUE_REQUESTS -> UPDATE_HYPERSPACE -> COMPLETE`.
//!
//! Schema validation requires the new schema's generation number to be
//! exactly one greater than the existing generation; otherwise fails with
//! `SchemaGenerationMismatch`. Disallowed changes (`UnsupportedOperation`):
//! changing `TIME_ORDER`; changing `COUNTER`; modifying a deleted family;
//! re-adding a family name not marked as a fresh addition.

use gridtable_types::schema::{AlterationError, Schema};

use crate::context::Context;
use crate::operation::{Operation, OperationPayload, OperationState};
use crate::operations::Outcome;

pub async fn execute(op: &mut Operation, ctx: &Context) -> Outcome {
    let OperationPayload::AlterTable { name, schema, id, completed, servers } = &mut op.payload
    else {
        op.fail("alter_table: payload mismatch");
        return Outcome::Terminal;
    };

    let state_label = match &op.state {
        OperationState::InProgress(s) => s.clone(),
        _ => "INITIAL".to_string(),
    };

    match state_label.as_str() {
        "INITIAL" => {
            op.transition("VALIDATE_SCHEMA");
            Outcome::Persisted
        }
        "VALIDATE_SCHEMA" => {
            let current = ctx.collaborators.schemas.get(name).unwrap_or_default();
            let proposed: Schema = match serde_json::from_str(schema) {
                Ok(s) => s,
                Err(e) => {
                    op.fail(gridtable_types::error::GridError::BadSchema(e.to_string()).to_string());
                    return Outcome::Terminal;
                }
            };
            match current.validate_alteration(&proposed) {
                Ok(()) => {
                    op.transition("SCAN_METADATA");
                    Outcome::Persisted
                }
                Err(AlterationError::GenerationMismatch { expected, got }) => {
                    op.fail(
                        gridtable_types::error::GridError::SchemaGenerationMismatch {
                            expected,
                            got,
                        }
                        .to_string(),
                    );
                    Outcome::Terminal
                }
                Err(e) => {
                    op.fail(
                        gridtable_types::error::GridError::UnsupportedOperation(e.to_string())
                            .to_string(),
                    );
                    Outcome::Terminal
                }
            }
        }
        "SCAN_METADATA" => {
            let pending: Vec<String> =
                servers.iter().filter(|s| !completed.contains(s)).cloned().collect();
            op.dependencies = pending.iter().map(|s| format!("server:{s}")).collect();
            op.transition("ISSUE_REQUESTS");
            Outcome::Persisted
        }
        "ISSUE_REQUESTS" => {
            let table_id = id.clone().unwrap_or_default();
            let pending: Vec<String> =
                servers.iter().filter(|s| !completed.contains(s)).cloned().collect();
            let mut any_error = false;
            for server in &pending {
                match ctx.collaborators.range_servers.update_schema(server, &table_id, schema).await {
                    Ok(()) => completed.push(server.clone()),
                    Err(_) => any_error = true,
                }
            }
            if any_error {
                op.transition("SCAN_METADATA");
            } else {
                op.transition("UPDATE_HYPERSPACE");
            }
            Outcome::Persisted
        }
        "UPDATE_HYPERSPACE" => {
            let Some(table_id) = id.clone() else {
                op.fail("alter_table: missing assigned id");
                return Outcome::Terminal;
            };
            match ctx.collaborators.hyperspace.create_table_file(&table_id, schema).await {
                Ok(()) => {
                    if let Ok(proposed) = serde_json::from_str::<Schema>(schema) {
                        ctx.collaborators.schemas.put(name, proposed);
                    }
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
            op.fail(format!("alter_table: unknown state {other}"));
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
    use crate::operation::{Operation, OperationKind};
    use crate::reference_manager::ReferenceManager;

    fn ctx_with_schema(generation: u32) -> (Context, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mml = Mml::open(dir.path().join("mml.log")).unwrap();
        let ctx = Context::new(
            MasterConfig::default(),
            mml,
            DependencyGraph::new(),
            ReferenceManager::new(),
            Collaborators::fake(),
        );
        let mut schema = Schema::new();
        schema.generation = generation;
        ctx.collaborators.schemas.put("/a/t", schema);
        (ctx, dir)
    }

    fn new_op(generation: u32) -> Operation {
        let mut schema = Schema::new();
        schema.generation = generation;
        Operation::new(
            1,
            OperationKind::AlterTable,
            OperationPayload::AlterTable {
                name: "/a/t".into(),
                schema: serde_json::to_string(&schema).unwrap(),
                id: Some("7".into()),
                completed: vec![],
                servers: vec![],
            },
        )
    }

    #[tokio::test]
    async fn generation_mismatch_fails_with_schema_generation_mismatch() {
        let (ctx, _dir) = ctx_with_schema(1);
        let mut op = new_op(3);
        loop {
            if matches!(execute(&mut op, &ctx).await, Outcome::Terminal) {
                break;
            }
        }
        assert_eq!(op.state, OperationState::Error);
        assert!(op.error_message.unwrap().contains("generation"));
    }

    #[tokio::test]
    async fn valid_generation_bump_completes() {
        let (ctx, _dir) = ctx_with_schema(1);
        let mut op = new_op(2);
        loop {
            if matches!(execute(&mut op, &ctx).await, Outcome::Terminal) {
                break;
            }
        }
        assert_eq!(op.state, OperationState::Complete);
        assert_eq!(ctx.collaborators.schemas.get("/a/t").unwrap().generation, 2);
    }

    #[tokio::test]
    async fn issue_requests_pushes_new_schema_to_each_server() {
        let dir = tempfile::tempdir().unwrap();
        let mml = Mml::open(dir.path().join("mml.log")).unwrap();
        let range_servers = std::sync::Arc::new(crate::collaborators::FakeRangeServers::new());
        let collaborators = Collaborators {
            hyperspace: std::sync::Arc::new(crate::collaborators::FakeHyperspace::new()),
            range_servers: range_servers.clone(),
            name_map: std::sync::Arc::new(crate::collaborators::FakeNameMap::new()),
            schemas: std::sync::Arc::new(crate::collaborators::SchemaStore::new()),
        };
        let mut base = Schema::new();
        base.generation = 1;
        collaborators.schemas.put("/a/t", base);
        let ctx = Context::new(
            MasterConfig::default(),
            mml,
            DependencyGraph::new(),
            ReferenceManager::new(),
            collaborators,
        );

        let mut schema = Schema::new();
        schema.generation = 2;
        let mut op = Operation::new(
            1,
            OperationKind::AlterTable,
            OperationPayload::AlterTable {
                name: "/a/t".into(),
                schema: serde_json::to_string(&schema).unwrap(),
                id: Some("7".into()),
                completed: vec![],
                servers: vec!["rs1".into(), "rs2".into()],
            },
        );
        loop {
            if matches!(execute(&mut op, &ctx).await, Outcome::Terminal) {
                break;
            }
        }
        assert_eq!(op.state, OperationState::Complete);
        let pushes = range_servers.schema_pushes();
        assert_eq!(pushes.len(), 2);
        assert!(pushes.iter().all(|(_, id, _)| id == "7"));
    }
}
