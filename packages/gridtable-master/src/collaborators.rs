//! External collaborators consumed through named trait interfaces: the
//! Hyperspace lock/metadata service, range servers, and the pathname-to-id
//! name map. Each trait ships an in-memory fake so the Operation engine can
//! be exercised end-to-end without a real Hyperspace or range server.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use gridtable_types::error::GridError;
use gridtable_types::schema::{Schema, TableIdentifier, TableParts};
use parking_lot::Mutex;

/// The cluster-wide lock/metadata service. A range server holds an
/// exclusive lock at `<toplevel>/servers/<location>` while alive; tables
/// are represented by files at `<toplevel>/tables/<id>` carrying schema
/// and a persistent `maintenance_disabled` attribute.
#[async_trait]
pub trait HyperspaceClient: Send + Sync {
    async fn create_table_file(&self, id: &str, schema: &str) -> Result<(), GridError>;
    async fn delete_table_file(&self, id: &str) -> Result<(), GridError>;
    async fn set_maintenance_disabled(&self, name: &str, disabled: bool) -> Result<(), GridError>;
    async fn get_maintenance_disabled(&self, name: &str) -> Result<bool, GridError>;
}

/// A range server, consumed as an RPC collaborator by DropTable,
/// SuspendMaintenance and CreateTable's load-range step.
#[async_trait]
pub trait RangeServerClient: Send + Sync {
    async fn drop_table(&self, location: &str, id: &str, parts: TableParts) -> Result<(), GridError>;
    async fn load_range(&self, location: &str, id: &str) -> Result<(), GridError>;
    async fn set_maintenance_disabled(&self, location: &str, disabled: bool) -> Result<(), GridError>;
    /// Pushes a table's new schema generation to a range server hosting it,
    /// AlterTable's `ISSUE_REQUESTS` collaborator call.
    async fn update_schema(&self, location: &str, id: &str, schema: &str) -> Result<(), GridError>;
}

/// Pathname <-> `TableIdentifier` mapping, populated by CreateTable's
/// `ASSIGN_ID` state and consulted by every subsequent operation that
/// addresses a table by name.
pub trait NameMap: Send + Sync {
    fn assign(&self, name: &str) -> TableIdentifier;
    fn resolve(&self, name: &str) -> Option<TableIdentifier>;
    fn remove(&self, name: &str);
}

/// In-memory `HyperspaceClient` fake.
#[derive(Debug, Default)]
pub struct FakeHyperspace {
    tables: Mutex<HashMap<String, String>>,
    maintenance_disabled: Mutex<HashMap<String, bool>>,
}

impl FakeHyperspace {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn has_table(&self, id: &str) -> bool {
        self.tables.lock().contains_key(id)
    }
}

#[async_trait]
impl HyperspaceClient for FakeHyperspace {
    async fn create_table_file(&self, id: &str, schema: &str) -> Result<(), GridError> {
        self.tables.lock().insert(id.to_string(), schema.to_string());
        Ok(())
    }

    async fn delete_table_file(&self, id: &str) -> Result<(), GridError> {
        if self.tables.lock().remove(id).is_none() {
            return Err(GridError::HyperspaceNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn set_maintenance_disabled(&self, name: &str, disabled: bool) -> Result<(), GridError> {
        self.maintenance_disabled.lock().insert(name.to_string(), disabled);
        Ok(())
    }

    async fn get_maintenance_disabled(&self, name: &str) -> Result<bool, GridError> {
        Ok(*self.maintenance_disabled.lock().get(name).unwrap_or(&false))
    }
}

/// In-memory `RangeServerClient` fake. Tests pre-load `servers_hosting` to
/// simulate which range servers host a table, and can inject failures via
/// `fail_next`.
#[derive(Debug, Default)]
pub struct FakeRangeServers {
    dropped: Mutex<Vec<(String, String)>>,
    loaded: Mutex<Vec<(String, String)>>,
    table_not_found: Mutex<Vec<(String, String)>>,
    schema_pushes: Mutex<Vec<(String, String, String)>>,
}

impl FakeRangeServers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `(location, id)` so a future `drop_table` call returns
    /// `TableNotFound`, exercising the idempotent-absorb retry path.
    pub fn simulate_table_not_found(&self, location: &str, id: &str) {
        self.table_not_found.lock().push((location.to_string(), id.to_string()));
    }

    #[must_use]
    pub fn dropped_calls(&self) -> Vec<(String, String)> {
        self.dropped.lock().clone()
    }

    #[must_use]
    pub fn schema_pushes(&self) -> Vec<(String, String, String)> {
        self.schema_pushes.lock().clone()
    }
}

#[async_trait]
impl RangeServerClient for FakeRangeServers {
    async fn drop_table(&self, location: &str, id: &str, _parts: TableParts) -> Result<(), GridError> {
        let key = (location.to_string(), id.to_string());
        if self.table_not_found.lock().contains(&key) {
            return Err(GridError::TableNotFound(id.to_string()));
        }
        self.dropped.lock().push(key);
        Ok(())
    }

    async fn load_range(&self, location: &str, id: &str) -> Result<(), GridError> {
        self.loaded.lock().push((location.to_string(), id.to_string()));
        Ok(())
    }

    async fn set_maintenance_disabled(&self, _location: &str, _disabled: bool) -> Result<(), GridError> {
        Ok(())
    }

    async fn update_schema(&self, location: &str, id: &str, schema: &str) -> Result<(), GridError> {
        self.schema_pushes.lock().push((location.to_string(), id.to_string(), schema.to_string()));
        Ok(())
    }
}

/// In-memory `NameMap` fake backed by a monotonic id counter.
#[derive(Debug, Default)]
pub struct FakeNameMap {
    table: Mutex<HashMap<String, TableIdentifier>>,
    next_id: Mutex<u64>,
}

impl FakeNameMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl NameMap for FakeNameMap {
    fn assign(&self, name: &str) -> TableIdentifier {
        let mut next_id = self.next_id.lock();
        let id = format!("{}", *next_id);
        *next_id += 1;
        let ident = TableIdentifier { name: name.to_string(), id: Some(id) };
        self.table.lock().insert(name.to_string(), ident.clone());
        ident
    }

    fn resolve(&self, name: &str) -> Option<TableIdentifier> {
        self.table.lock().get(name).cloned()
    }

    fn remove(&self, name: &str) {
        self.table.lock().remove(name);
    }
}

/// Registry of in-progress and historical schemas, keyed by table name,
/// used by AlterTable's `VALIDATE_SCHEMA` state.
#[derive(Debug, Default)]
pub struct SchemaStore {
    schemas: Mutex<HashMap<String, Schema>>,
}

impl SchemaStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, name: &str, schema: Schema) {
        self.schemas.lock().insert(name.to_string(), schema);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Schema> {
        self.schemas.lock().get(name).cloned()
    }
}

/// Convenience bundle of collaborator handles, cloned cheaply via `Arc`.
#[derive(Clone)]
pub struct Collaborators {
    pub hyperspace: Arc<dyn HyperspaceClient>,
    pub range_servers: Arc<dyn RangeServerClient>,
    pub name_map: Arc<dyn NameMap>,
    pub schemas: Arc<SchemaStore>,
}

impl Collaborators {
    #[must_use]
    pub fn fake() -> Self {
        Self {
            hyperspace: Arc::new(FakeHyperspace::new()),
            range_servers: Arc::new(FakeRangeServers::new()),
            name_map: Arc::new(FakeNameMap::new()),
            schemas: Arc::new(SchemaStore::new()),
        }
    }
}
