//! Table schema model: identifiers, column families, access groups, and the
//! `TableParts` bitmask used by CreateTable/DropTable/RecreateIndexTables to
//! know which of a table's associated index tables an operation also
//! applies to.

use serde::{Deserialize, Serialize};

/// A table's two-phase identity: `name` is the client-facing pathname used
/// before the table exists in Hyperspace; `id` is assigned during
/// `CreateTable`'s `ASSIGN_ID` state and becomes the MML/Hyperspace key for
/// every subsequent operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableIdentifier {
    pub name: String,
    pub id: Option<String>,
}

impl TableIdentifier {
    #[must_use]
    pub fn unassigned(name: impl Into<String>) -> Self {
        Self { name: name.into(), id: None }
    }

    #[must_use]
    pub fn is_assigned(&self) -> bool {
        self.id.is_some()
    }
}

/// Ordering applied to a column family's cell revisions within a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeOrder {
    Ascending,
    Descending,
}

/// A single column family definition.
///
/// `deleted` is a tombstone flag set by AlterTable's column-drop path: the
/// family definition is retained (so historical cells remain decodable)
/// but is no longer writable and is excluded from new access-group
/// assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnFamily {
    pub name: String,
    pub id: u32,
    pub time_order: TimeOrder,
    pub counter: bool,
    pub max_versions: Option<u32>,
    pub ttl_secs: Option<u64>,
    pub deleted: bool,
}

impl ColumnFamily {
    #[must_use]
    pub fn new(name: impl Into<String>, id: u32) -> Self {
        Self {
            name: name.into(),
            id,
            time_order: TimeOrder::Descending,
            counter: false,
            max_versions: None,
            ttl_secs: None,
            deleted: false,
        }
    }
}

/// A set of column families stored together in the same on-disk file
/// family, the unit the Garbage Tracker operates on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGroup {
    pub name: String,
    pub column_families: Vec<String>,
    pub in_memory: bool,
}

/// A table's schema: generation number plus its access groups and column
/// families. AlterTable requires the new schema's generation to be exactly
/// one greater than the existing generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub generation: u32,
    pub access_groups: Vec<AccessGroup>,
    pub column_families: Vec<ColumnFamily>,
}

impl Schema {
    #[must_use]
    pub fn new() -> Self {
        Self {
            generation: 1,
            access_groups: Vec::new(),
            column_families: Vec::new(),
        }
    }

    #[must_use]
    pub fn column_family(&self, name: &str) -> Option<&ColumnFamily> {
        self.column_families.iter().find(|cf| cf.name == name)
    }

    /// Validates a proposed next-generation schema against this one per the
    /// AlterTable rules: generation must advance by exactly one; a deleted
    /// family may not be modified; TIME_ORDER and COUNTER are immutable
    /// once set; a family name may only reappear if it was never dropped.
    pub fn validate_alteration(&self, proposed: &Schema) -> Result<(), AlterationError> {
        if proposed.generation != self.generation + 1 {
            return Err(AlterationError::GenerationMismatch {
                expected: self.generation + 1,
                got: proposed.generation,
            });
        }
        for old in &self.column_families {
            let Some(new) = proposed.column_families.iter().find(|cf| cf.name == old.name) else {
                continue;
            };
            if old.deleted {
                return Err(AlterationError::ModifiedDeletedFamily(old.name.clone()));
            }
            if old.time_order != new.time_order {
                return Err(AlterationError::ImmutableFieldChanged {
                    family: old.name.clone(),
                    field: "time_order",
                });
            }
            if old.counter != new.counter {
                return Err(AlterationError::ImmutableFieldChanged {
                    family: old.name.clone(),
                    field: "counter",
                });
            }
        }
        Ok(())
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::new()
    }
}

/// Rejection reasons for [`Schema::validate_alteration`], mapped by the
/// caller onto `GridError::SchemaGenerationMismatch` /
/// `GridError::UnsupportedOperation`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AlterationError {
    #[error("schema generation mismatch: expected {expected}, got {got}")]
    GenerationMismatch { expected: u32, got: u32 },
    #[error("column family {0} is deleted and cannot be modified")]
    ModifiedDeletedFamily(String),
    #[error("field {field} of column family {family} is immutable")]
    ImmutableFieldChanged { family: String, field: &'static str },
}

/// Bitmask identifying which of a table's associated index tables an
/// operation also applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableParts(pub u8);

impl TableParts {
    pub const PRIMARY: TableParts = TableParts(0x01);
    pub const VALUE_INDEX: TableParts = TableParts(0x02);
    pub const QUALIFIER_INDEX: TableParts = TableParts(0x04);

    #[must_use]
    pub fn contains(self, other: TableParts) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for TableParts {
    type Output = TableParts;
    fn bitor(self, rhs: TableParts) -> TableParts {
        TableParts(self.0 | rhs.0)
    }
}

/// Derives the value-index table's pathname for `table_name`: the
/// `^`-prefixed sibling `<dirname>/^<basename>` (or `/^<basename>` when
/// `table_name` lives at the root).
#[must_use]
pub fn value_index_table_name(table_name: &str) -> String {
    sibling_table_name(table_name, "^")
}

/// Derives the qualifier-index table's pathname for `table_name`: the
/// `^^`-prefixed sibling `<dirname>/^^<basename>`.
#[must_use]
pub fn qualifier_index_table_name(table_name: &str) -> String {
    sibling_table_name(table_name, "^^")
}

fn sibling_table_name(table_name: &str, marker: &str) -> String {
    match table_name.rfind('/') {
        Some(0) => format!("/{marker}{}", &table_name[1..]),
        Some(idx) => format!("{}/{marker}{}", &table_name[..idx], &table_name[idx + 1..]),
        None => format!("{marker}{table_name}"),
    }
}
