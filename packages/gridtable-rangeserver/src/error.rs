//! Range-server error conditions layered over the shared [`GridError`]
//! taxonomy.

use gridtable_types::error::GridError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RangeError {
    #[error(transparent)]
    Grid(#[from] GridError),

    #[error("range {0} is blocked (split/move in progress)")]
    RangeBlocked(String),

    #[error("no range hosts row key {0:?}")]
    NoRangeForKey(Vec<u8>),

    #[error("commit log write failed fatally: {0}")]
    CommitLogFatal(String),

    #[error("scanner id {0} not found")]
    UnknownScanner(u64),

    #[error("log-replay barrier wait on phase {0} timed out")]
    BarrierTimeout(&'static str),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
