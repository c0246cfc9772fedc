//! Master-specific error conditions layered over the shared [`GridError`]
//! taxonomy.

use gridtable_types::error::GridError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MasterError {
    #[error(transparent)]
    Grid(#[from] GridError),

    #[error("operation {0} is not ready to execute")]
    OperationNotReady(u64),

    #[error("dependency graph cycle detected among live operations")]
    DependencyCycle,

    #[error("exclusivity label {0} already claimed by another live operation")]
    ExclusivityConflict(String),

    #[error("mml corruption detected mid-file at offset {0}; refusing to serve")]
    MmlCorrupt(u64),

    #[error("reference manager has no entry for hash-code {0}")]
    UnknownReference(u64),

    #[error("sub-operation removal deferred: approval mask not yet zero")]
    RemovalDeferred,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
