//! `DropTable`: `INITIAL -> DROP_VALUE_INDEX (optional, sub-op) ->
//! DROP_QUALIFIER_INDEX (optional, sub-op) -> UPDATE_HYPERSPACE ->
//! SCAN_METADATA -> ISSUE_REQUESTS -> COMPLETE`.
//!
//! `DROP_VALUE_INDEX`/`DROP_QUALIFIER_INDEX` inject their own `DropTable`
//! sub-operations against the table's `^`/`^^`-prefixed index siblings
//! (`parts = PRIMARY`, since each index table is being dropped outright).
//! `UPDATE_HYPERSPACE` skips straight to `SCAN_METADATA` when `parts` lacks
//! `PRIMARY`: `RecreateIndexTables` drives this state machine against the
//! same `table_name` with only the index bits set, to drop index data
//! without touching the primary table's Hyperspace file.
//!
//! In `SCAN_METADATA`, computes the set of range servers hosting the table
//! (minus those already in `completed`) and makes each a dependency. In
//! `ISSUE_REQUESTS`, fans out a drop RPC to every server in `servers`; on
//! any error, successful and `TABLE_NOT_FOUND` responses move to
//! `completed`, the state resets to `SCAN_METADATA`, and the operation
//! re-persists and re-enters the queue (retry loop until `servers` is
//! empty). `TABLE_NOT_FOUND` is treated as success (idempotent: the server
//! has already forgotten the table).

use gridtable_types::schema::{qualifier_index_table_name, value_index_table_name, TableParts};

use crate::context::Context;
use crate::operation::{Operation, OperationKind, OperationPayload, OperationState};
use crate::operations::Outcome;

pub async fn execute(op: &mut Operation, ctx: &Context) -> Outcome {
    let OperationPayload::DropTable { if_exists, name, id, completed, servers, parts } =
        &mut op.payload
    else {
        op.fail("drop_table: payload mismatch");
        return Outcome::Terminal;
    };

    let state_label = match &op.state {
        OperationState::InProgress(s) => s.clone(),
        _ => "INITIAL".to_string(),
    };

    match state_label.as_str() {
        "INITIAL" => {
            if ctx.collaborators.name_map.resolve(name).is_none() && !*if_exists {
                let missing_name = name.clone();
                op.fail(gridtable_types::error::GridError::TableNotFound(missing_name).to_string());
                return Outcome::Terminal;
            }
            op.transition("DROP_VALUE_INDEX");
            Outcome::Persisted
        }
        "DROP_VALUE_INDEX" => {
            if TableParts(*parts).contains(TableParts::VALUE_INDEX) {
                let index_name = value_index_table_name(name);
                let sub_id = ctx.alloc_op_id();
                let mut sub = Operation::new(
                    sub_id,
                    OperationKind::DropTable,
                    OperationPayload::DropTable {
                        if_exists: true,
                        name: index_name.clone(),
                        id: ctx.collaborators.name_map.resolve(&index_name).and_then(|t| t.id),
                        completed: Vec::new(),
                        servers: servers.clone(),
                        parts: TableParts::PRIMARY.0,
                    },
                );
                sub.exclusivities = vec![index_name.clone()];
                sub.obstructions = vec![format!("{index_name}-drop-index")];
                op.transition("DROP_QUALIFIER_INDEX");
                return Outcome::Yielded(vec![sub]);
            }
            op.transition("DROP_QUALIFIER_INDEX");
            Outcome::Persisted
        }
        "DROP_QUALIFIER_INDEX" => {
            if TableParts(*parts).contains(TableParts::QUALIFIER_INDEX) {
                let index_name = qualifier_index_table_name(name);
                let sub_id = ctx.alloc_op_id();
                let mut sub = Operation::new(
                    sub_id,
                    OperationKind::DropTable,
                    OperationPayload::DropTable {
                        if_exists: true,
                        name: index_name.clone(),
                        id: ctx.collaborators.name_map.resolve(&index_name).and_then(|t| t.id),
                        completed: Vec::new(),
                        servers: servers.clone(),
                        parts: TableParts::PRIMARY.0,
                    },
                );
                sub.exclusivities = vec![index_name.clone()];
                sub.obstructions = vec![format!("{index_name}-drop-qualifier-index")];
                op.transition("UPDATE_HYPERSPACE");
                return Outcome::Yielded(vec![sub]);
            }
            op.transition("UPDATE_HYPERSPACE");
            Outcome::Persisted
        }
        "UPDATE_HYPERSPACE" => {
            if !TableParts(*parts).contains(TableParts::PRIMARY) {
                op.transition("SCAN_METADATA");
                return Outcome::Persisted;
            }
            if let Some(table_id) = id.clone() {
                match ctx.collaborators.hyperspace.delete_table_file(&table_id).await {
                    Ok(()) | Err(gridtable_types::error::GridError::HyperspaceNotFound(_)) => {}
                    Err(e) => {
                        op.fail(e.to_string());
                        return Outcome::Terminal;
                    }
                }
            }
            op.transition("SCAN_METADATA");
            Outcome::Persisted
        }
        "SCAN_METADATA" => {
            if servers.is_empty() {
                op.dependencies.clear();
                // Nothing left to contact -- we are done.
                if TableParts(*parts).contains(TableParts::PRIMARY) {
                    ctx.collaborators.name_map.remove(name);
                }
                op.complete();
                return Outcome::Terminal;
            }
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
                match ctx
                    .collaborators
                    .range_servers
                    .drop_table(server, &table_id, TableParts(*parts))
                    .await
                {
                    Ok(()) => completed.push(server.clone()),
                    Err(gridtable_types::error::GridError::TableNotFound(_)) => {
                        completed.push(server.clone());
                    }
                    Err(_) => any_error = true,
                }
            }
            if any_error {
                op.transition("SCAN_METADATA");
                Outcome::Persisted
            } else {
                if TableParts(*parts).contains(TableParts::PRIMARY) {
                    ctx.collaborators.name_map.remove(name);
                }
                op.complete();
                Outcome::Terminal
            }
        }
        other => {
            op.fail(format!("drop_table: unknown state {other}"));
            Outcome::Terminal
        }
    }
}
