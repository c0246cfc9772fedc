//! Range-server update and garbage-collection subsystem: the three-stage
//! write pipeline, the per-access-group garbage tracker, the scanner map,
//! and the log-replay barrier that gates queries during recovery.

pub mod config;
pub mod error;
pub mod garbage_tracker;
pub mod memory_tracker;
pub mod pipeline;
pub mod replay_barrier;
pub mod scanner_map;
pub mod storage;
pub mod update_rec_range;

pub use config::RangeServerConfig;
pub use error::RangeError;
pub use pipeline::{BatchResponse, RangeOutcome, UpdatePipeline};
