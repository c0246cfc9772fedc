//! Shared error taxonomy, carried on the wire in RPC responses.
//!
//! `GridError` covers the kinds of failure that can cross a collaborator
//! boundary (Hyperspace, a range server, a commit log) and therefore need a
//! stable `error_code`/`error_message` wire representation (see
//! [`crate::wire::ResponseHeader`]). Master- and range-server-internal
//! conditions that never cross that boundary live in each crate's own error
//! enum and wrap this one via `#[from]` where relevant.

use thiserror::Error;

/// Error kinds shared between the master and the range server, and
/// serializable onto the RPC response wire format.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GridError {
    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("bad schema: {0}")]
    BadSchema(String),

    #[error("schema generation mismatch: expected {expected}, got {got}")]
    SchemaGenerationMismatch { expected: u32, got: u32 },

    #[error("syntax error: {0}")]
    SyntaxError(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("hyperspace path not found: {0}")]
    HyperspaceNotFound(String),

    #[error("hyperspace bad path: {0}")]
    HyperspaceBadPath(String),

    #[error("timestamp order error: revision {attempted} is not greater than last applied revision {last}")]
    TimestampOrderError { attempted: i64, last: i64 },

    #[error("block compressor bad header")]
    BlockCompressorBadHeader,

    #[error("block compressor checksum mismatch")]
    BlockCompressorChecksumMismatch,

    #[error("too many columns: {0}")]
    TooManyColumns(usize),

    #[error("command parse error: {0}")]
    CommandParseError(String),

    #[error("external error: {0}")]
    External(String),
}

impl GridError {
    /// Stable numeric code for the wire response header.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::TableNotFound(_) => 1,
            Self::BadSchema(_) => 2,
            Self::SchemaGenerationMismatch { .. } => 3,
            Self::SyntaxError(_) => 4,
            Self::InvalidOperation(_) => 5,
            Self::UnsupportedOperation(_) => 6,
            Self::HyperspaceNotFound(_) => 7,
            Self::HyperspaceBadPath(_) => 8,
            Self::TimestampOrderError { .. } => 9,
            Self::BlockCompressorBadHeader => 10,
            Self::BlockCompressorChecksumMismatch => 11,
            Self::TooManyColumns(_) => 12,
            Self::CommandParseError(_) => 13,
            Self::External(_) => 99,
        }
    }

    /// Whether this error is idempotent-absorbable during a drop-path retry
    /// loop (the request has already been satisfied by a previous attempt).
    #[must_use]
    pub fn is_idempotent_absorbable(&self) -> bool {
        matches!(self, Self::TableNotFound(_) | Self::HyperspaceNotFound(_))
    }
}
