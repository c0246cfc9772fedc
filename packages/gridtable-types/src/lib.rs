//! Shared data model, wire types and error taxonomy for the table store.
//!
//! This crate provides the foundation layer consumed by both the master
//! operation engine and the range server:
//!
//! - **Error** ([`error`]): the `GridError` taxonomy shared across crates
//! - **Revision** ([`revision`]): a Hybrid-Logical-Clock-derived revision
//!   generator used to stamp range mutations with monotone revisions
//! - **Schema** ([`schema`]): `TableIdentifier`, `ColumnFamily`, `AccessGroup`,
//!   `Schema`, `TableParts`
//! - **Key** ([`key`]): `CellKey`, row-key range helpers
//! - **Wire** ([`wire`]): RPC event header and response header layouts
//! - **Hash** ([`hash`]): hash-code utility for the Reference Manager's weak
//!   index pattern

pub mod error;
pub mod hash;
pub mod key;
pub mod revision;
pub mod schema;
pub mod wire;
