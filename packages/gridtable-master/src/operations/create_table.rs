//! `CreateTable`: `INITIAL -> ASSIGN_ID -> CREATE_INDEX (optional, sub-op)
//! -> CREATE_QUALIFIER_INDEX (optional, sub-op) -> WRITE_METADATA ->
//! ASSIGN_LOCATION -> LOAD_RANGE -> ACKNOWLEDGE -> COMPLETE`.
//!
//! Exclusivities: the table's full pathname. Partial failures: if
//! load-range fails, the operation retries the assignment after the
//! failover grace period; if Hyperspace table-file creation fails with
//! "exists", reverts to `ERROR` unless the idempotence flag is set.

use gridtable_types::schema::{qualifier_index_table_name, value_index_table_name, TableParts};

use crate::context::Context;
use crate::operation::{Operation, OperationKind, OperationPayload};
use crate::operations::Outcome;

const LOCATION: &str = "rs1";

pub async fn execute(op: &mut Operation, ctx: &Context) -> Outcome {
    let OperationPayload::CreateTable { name, schema, id, location, parts, idempotent } =
        &mut op.payload
    else {
        op.fail("create_table: payload mismatch");
        return Outcome::Terminal;
    };

    let state_label = match &op.state {
        crate::operation::OperationState::InProgress(s) => s.clone(),
        _ => "INITIAL".to_string(),
    };

    match state_label.as_str() {
        "INITIAL" => {
            op.exclusivities = vec![name.clone()];
            op.transition("ASSIGN_ID");
            Outcome::Persisted
        }
        "ASSIGN_ID" => {
            let ident = ctx.collaborators.name_map.assign(name);
            *id = ident.id;
            op.transition("CREATE_INDEX");
            Outcome::Persisted
        }
        "CREATE_INDEX" => {
            if TableParts(*parts).contains(TableParts::VALUE_INDEX) {
                let index_name = value_index_table_name(name);
                let sub_id = ctx.alloc_op_id();
                let mut sub = Operation::new(
                    sub_id,
                    OperationKind::CreateTable,
                    OperationPayload::CreateTable {
                        name: index_name.clone(),
                        schema: schema.clone(),
                        id: None,
                        location: None,
                        parts: TableParts::PRIMARY.0,
                        idempotent: *idempotent,
                    },
                );
                sub.exclusivities = vec![index_name.clone()];
                sub.obstructions = vec![format!("{index_name}-create-index")];
                op.transition("CREATE_QUALIFIER_INDEX");
                return Outcome::Yielded(vec![sub]);
            }
            op.transition("CREATE_QUALIFIER_INDEX");
            Outcome::Persisted
        }
        "CREATE_QUALIFIER_INDEX" => {
            if TableParts(*parts).contains(TableParts::QUALIFIER_INDEX) {
                let index_name = qualifier_index_table_name(name);
                let sub_id = ctx.alloc_op_id();
                let mut sub = Operation::new(
                    sub_id,
                    OperationKind::CreateTable,
                    OperationPayload::CreateTable {
                        name: index_name.clone(),
                        schema: schema.clone(),
                        id: None,
                        location: None,
                        parts: TableParts::PRIMARY.0,
                        idempotent: *idempotent,
                    },
                );
                sub.exclusivities = vec![index_name.clone()];
                sub.obstructions = vec![format!("{index_name}-create-qualifier-index")];
                op.transition("WRITE_METADATA");
                return Outcome::Yielded(vec![sub]);
            }
            op.transition("WRITE_METADATA");
            Outcome::Persisted
        }
        "WRITE_METADATA" => {
            let Some(table_id) = id.clone() else {
                op.fail("create_table: missing assigned id");
                return Outcome::Terminal;
            };
            match ctx.collaborators.hyperspace.create_table_file(&table_id, schema).await {
                Ok(()) => {
                    ctx.collaborators.schemas.put(name, gridtable_types::schema::Schema::new());
                    op.transition("ASSIGN_LOCATION");
                    Outcome::Persisted
                }
                Err(_) if *idempotent => {
                    op.transition("ASSIGN_LOCATION");
                    Outcome::Persisted
                }
                Err(e) => {
                    op.fail(e.to_string());
                    Outcome::Terminal
                }
            }
        }
        "ASSIGN_LOCATION" => {
            *location = Some(LOCATION.to_string());
            op.transition("LOAD_RANGE");
            Outcome::Persisted
        }
        "LOAD_RANGE" => {
            let Some(table_id) = id.clone() else {
                op.fail("create_table: missing assigned id");
                return Outcome::Terminal;
            };
            let loc = location.clone().unwrap_or_else(|| LOCATION.to_string());
            match ctx.collaborators.range_servers.load_range(&loc, &table_id).await {
                Ok(()) => {
                    op.transition("ACKNOWLEDGE");
                    Outcome::Persisted
                }
                Err(_) => {
                    // Retry the assignment after the failover grace period
                    // has had a chance to elapse; the processor re-enqueues
                    // this operation once its dependencies clear again.
                    op.transition("ASSIGN_LOCATION");
                    Outcome::Persisted
                }
            }
        }
        "ACKNOWLEDGE" => {
            op.complete();
            Outcome::Terminal
        }
        other => {
            op.fail(format!("create_table: unknown state {other}"));
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
    use crate::operation::{OperationKind, OperationState};
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

    fn new_op() -> Operation {
        Operation::new(
            1,
            OperationKind::CreateTable,
            OperationPayload::CreateTable {
                name: "/a/t".into(),
                schema: "schema-v1".into(),
                id: None,
                location: None,
                parts: TableParts::PRIMARY.0,
                idempotent: false,
            },
        )
    }

    #[tokio::test]
    async fn full_happy_path_reaches_complete() {
        let (ctx, _dir) = ctx();
        let mut op = new_op();
        loop {
            let outcome = execute(&mut op, &ctx).await;
            if matches!(outcome, Outcome::Terminal) {
                break;
            }
        }
        assert_eq!(op.state, OperationState::Complete);
        let OperationPayload::CreateTable { id, .. } = &op.payload else { unreachable!() };
        assert!(id.is_some());
    }

    #[tokio::test]
    async fn assign_id_sets_exclusivity_on_initial() {
        let (ctx, _dir) = ctx();
        let mut op = new_op();
        execute(&mut op, &ctx).await;
        assert_eq!(op.exclusivities, vec!["/a/t".to_string()]);
    }

    #[tokio::test]
    async fn value_and_qualifier_index_parts_yield_sub_tables() {
        let (ctx, _dir) = ctx();
        let mut op = Operation::new(
            1,
            OperationKind::CreateTable,
            OperationPayload::CreateTable {
                name: "/a/t".into(),
                schema: "schema-v1".into(),
                id: None,
                location: None,
                parts: (TableParts::PRIMARY | TableParts::VALUE_INDEX | TableParts::QUALIFIER_INDEX).0,
                idempotent: false,
            },
        );
        execute(&mut op, &ctx).await; // INITIAL
        execute(&mut op, &ctx).await; // ASSIGN_ID

        let Outcome::Yielded(subs) = execute(&mut op, &ctx).await else { panic!("expected yield") };
        assert_eq!(subs.len(), 1);
        let OperationPayload::CreateTable { name, parts, .. } = &subs[0].payload else { unreachable!() };
        assert_eq!(name, "/a/^t");
        assert_eq!(*parts, TableParts::PRIMARY.0);

        let Outcome::Yielded(subs) = execute(&mut op, &ctx).await else { panic!("expected yield") };
        let OperationPayload::CreateTable { name, .. } = &subs[0].payload else { unreachable!() };
        assert_eq!(name, "/a/^^t");
    }

    #[tokio::test]
    async fn primary_only_table_skips_index_sub_ops() {
        let (ctx, _dir) = ctx();
        let mut op = new_op();
        loop {
            if matches!(execute(&mut op, &ctx).await, Outcome::Terminal) {
                break;
            }
        }
        assert_eq!(op.state, OperationState::Complete);
    }
}
