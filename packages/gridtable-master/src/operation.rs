//! The universal unit of work at the master: `Operation`, its kind tag, and
//! the state values each kind's finite state machine steps through.
//!
//! Modelled as a tagged variant over operation kinds with a single
//! `execute(&mut self, ctx)` dispatcher (see [`crate::operations`]),
//! eliminating the need for the source's virtual-inheritance factories.

use gridtable_types::schema::TableParts;

/// Variant tag identifying which finite state machine an [`Operation`]
/// runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    CreateTable,
    DropTable,
    AlterTable,
    RecreateIndexTables,
    SuspendMaintenance,
    ToggleTableMaintenance,
    Recover,
    RegisterServer,
    RegisterServerBlocker,
    Status,
    TimedBarrier,
}

impl OperationKind {
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::CreateTable => "CreateTable",
            Self::DropTable => "DropTable",
            Self::AlterTable => "AlterTable",
            Self::RecreateIndexTables => "RecreateIndexTables",
            Self::SuspendMaintenance => "SuspendMaintenance",
            Self::ToggleTableMaintenance => "ToggleTableMaintenance",
            Self::Recover => "Recover",
            Self::RegisterServer => "RegisterServer",
            Self::RegisterServerBlocker => "RegisterServerBlocker",
            Self::Status => "Status",
            Self::TimedBarrier => "TimedBarrier",
        }
    }

    /// MML `entity_type` tag. Stable across releases: changing a kind's
    /// number would make old log segments undecodable.
    #[must_use]
    pub fn entity_tag(self) -> u16 {
        match self {
            Self::CreateTable => 1,
            Self::DropTable => 2,
            Self::AlterTable => 3,
            Self::RecreateIndexTables => 4,
            Self::SuspendMaintenance => 5,
            Self::ToggleTableMaintenance => 6,
            Self::Recover => 7,
            Self::RegisterServer => 8,
            Self::RegisterServerBlocker => 9,
            Self::Status => 10,
            Self::TimedBarrier => 11,
        }
    }

    #[must_use]
    pub fn from_entity_tag(tag: u16) -> Option<Self> {
        Some(match tag {
            1 => Self::CreateTable,
            2 => Self::DropTable,
            3 => Self::AlterTable,
            4 => Self::RecreateIndexTables,
            5 => Self::SuspendMaintenance,
            6 => Self::ToggleTableMaintenance,
            7 => Self::Recover,
            8 => Self::RegisterServer,
            9 => Self::RegisterServerBlocker,
            10 => Self::Status,
            11 => Self::TimedBarrier,
            _ => return None,
        })
    }

    /// MML payload encoding version for this kind (DropTable v3 and
    /// AlterTable v2 carry history from a prior payload shape; every other
    /// kind starts at v1).
    #[must_use]
    pub fn encoding_version(self) -> u16 {
        match self {
            Self::DropTable => 3,
            Self::AlterTable => 2,
            _ => 1,
        }
    }
}

/// Terminal or in-progress state value. Each kind's FSM defines its own
/// sequence of in-progress values; `Complete`/`Error` are shared terminal
/// states checked by the processor and the reference manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationState {
    Initial,
    InProgress(String),
    Complete,
    Error,
}

impl OperationState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

/// The universal unit of work at the master.
#[derive(Debug, Clone)]
pub struct Operation {
    pub id: u64,
    pub kind: OperationKind,
    pub state: OperationState,
    pub dependencies: Vec<String>,
    pub obstructions: Vec<String>,
    pub exclusivities: Vec<String>,
    pub ephemeral: bool,
    pub remove_approval_mask: u32,
    pub marked_for_removal: bool,
    pub error_message: Option<String>,
    /// Free-form payload, interpreted per `kind` by `operations::*`.
    pub payload: OperationPayload,
}

impl Operation {
    #[must_use]
    pub fn new(id: u64, kind: OperationKind, payload: OperationPayload) -> Self {
        Self {
            id,
            kind,
            state: OperationState::Initial,
            dependencies: Vec::new(),
            obstructions: Vec::new(),
            exclusivities: Vec::new(),
            ephemeral: false,
            remove_approval_mask: 0,
            marked_for_removal: false,
            error_message: None,
            payload,
        }
    }

    #[must_use]
    pub fn hash_code(&self) -> u64 {
        gridtable_types::hash::operation_hash_code(self.id, self.kind.tag())
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.state = OperationState::Error;
        self.error_message = Some(message.into());
        self.marked_for_removal = true;
    }

    pub fn complete(&mut self) {
        self.state = OperationState::Complete;
        self.marked_for_removal = true;
    }

    pub fn transition(&mut self, label: impl Into<String>) {
        self.state = OperationState::InProgress(label.into());
    }
}

/// Per-kind working state. Kept as one enum (rather than a trait object per
/// operation kind) so the whole `Operation` remains `Serialize`/`Deserialize`
/// for the MML without per-variant boxed encode/decode machinery.
#[derive(Debug, Clone)]
pub enum OperationPayload {
    CreateTable {
        name: String,
        schema: String,
        id: Option<String>,
        location: Option<String>,
        parts: u8,
        idempotent: bool,
    },
    DropTable {
        if_exists: bool,
        name: String,
        id: Option<String>,
        completed: Vec<String>,
        servers: Vec<String>,
        parts: u8,
    },
    AlterTable {
        name: String,
        schema: String,
        id: Option<String>,
        completed: Vec<String>,
        servers: Vec<String>,
    },
    RecreateIndexTables {
        table_name: String,
        schema: String,
        parts: u8,
        servers: Vec<String>,
        subop_hash: Option<u64>,
        step: u8,
    },
    SuspendMaintenance {
        name: String,
        id: Option<String>,
        label: String,
        resume: bool,
        servers: Vec<String>,
        completed: Vec<String>,
    },
    Recover {
        location: String,
        barrier_deadline_millis: u64,
    },
    RegisterServerBlocker {
        location: String,
    },
    RegisterServer {
        location: String,
    },
    ToggleTableMaintenance {
        name: String,
        disable: bool,
    },
    None,
}

#[must_use]
pub fn table_parts_from_u8(v: u8) -> TableParts {
    TableParts(v)
}
