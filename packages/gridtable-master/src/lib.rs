//! Master Operation Engine: a crash-safe, dependency-scheduled state
//! machine runtime for cluster-control operations (table lifecycle, range
//! server registration/recovery, maintenance suspension).
//!
//! Durability is provided by the Metalog ([`mml`]); cross-operation
//! ordering by the [`dependency_graph`]; long-lived operation storage by
//! the [`reference_manager`]; and scheduling by the [`processor`], which
//! drains the dependency graph's ready frontier through a fixed worker
//! pool. [`hyperspace_watcher`] bridges external lock-lifecycle events into
//! new operations.

pub mod collaborators;
pub mod config;
pub mod context;
pub mod dependency_graph;
pub mod error;
pub mod hyperspace_watcher;
pub mod mml;
pub mod operation;
pub mod operations;
pub mod processor;
pub mod reference_manager;
pub mod telemetry;

pub use config::MasterConfig;
pub use context::Context;
pub use error::MasterError;
pub use operation::{Operation, OperationKind, OperationPayload, OperationState};
pub use processor::Processor;
