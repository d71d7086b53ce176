//! Dispatch core for Siren.
//!
//! This crate owns the incident lifecycle table, the ambulance registry and
//! inventory ledger rules, and the [`Dispatcher`] that applies them to a
//! [`StateStore`](siren_store::StateStore) inside one locked unit of work per
//! request. Rule violations come back as [`Rejection`]s, distinct from
//! persistence faults.

pub mod dispatcher;
pub mod ledger;
pub mod lifecycle;
pub mod registry;
pub mod view;

pub use dispatcher::{
    Command, CreateOutcome, Dispatcher, MaintenanceAction, Outcome, ProvisionReport,
};
pub use lifecycle::{rule, validate_transition, Binding, Rule, TransitionKind, RULES};
pub use registry::{read_status, UnitReading};
pub use view::{build_snapshot, ItemView, Snapshot};

use serde::Serialize;
use siren_schema::{ConfigError, IncidentId, IncidentStatus, ItemKey, KeyError, UnitId, UnitStatus};
use siren_store::StoreError;
use std::fmt;
use thiserror::Error;

/// A client-correctable refusal: the request was well-formed but the current
/// state does not allow it. Nothing was changed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("incident '{0}' not found")]
    IncidentNotFound(IncidentId),
    #[error("cannot {event} incident '{incident}': status is {actual}, expected {expected}")]
    WrongState {
        incident: IncidentId,
        event: TransitionKind,
        expected: IncidentStatus,
        actual: IncidentStatus,
    },
    #[error("unit '{unit}' is already bound to incident '{incident}'")]
    UnitBound { unit: UnitId, incident: IncidentId },
    #[error("unit '{unit}' is not bound to incident '{incident}'")]
    UnitMismatch { unit: UnitId, incident: IncidentId },
    #[error("incident '{0}' has no bound unit")]
    NoBoundUnit(IncidentId),
    #[error("unit '{unit}' is {actual}, expected {expected}")]
    UnitState {
        unit: UnitId,
        expected: UnitStatus,
        actual: UnitStatus,
    },
    #[error("adjusting '{key}' by {delta} would go negative (stock {qty})")]
    WouldGoNegative { key: ItemKey, qty: u32, delta: i64 },
}

fn join_keys(keys: &[ItemKey]) -> String {
    keys.iter()
        .map(ItemKey::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("rejected: {0}")]
    Rejected(#[from] Rejection),
    #[error("inventory exhausted: {}", join_keys(.missing))]
    InventoryExhausted { missing: Vec<ItemKey> },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("store error: {0}")]
    Persistence(#[from] StoreError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl From<KeyError> for CoreError {
    fn from(e: KeyError) -> Self {
        CoreError::InvalidArgument(e.to_string())
    }
}

/// Coarse classification surfaces map to exit codes and HTTP statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RejectedTransition,
    InventoryExhausted,
    InvalidArgument,
    PersistenceFault,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::RejectedTransition => write!(f, "rejected_transition"),
            ErrorKind::InventoryExhausted => write!(f, "inventory_exhausted"),
            ErrorKind::InvalidArgument => write!(f, "invalid_argument"),
            ErrorKind::PersistenceFault => write!(f, "persistence_fault"),
        }
    }
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Rejected(_) => ErrorKind::RejectedTransition,
            CoreError::InventoryExhausted { .. } => ErrorKind::InventoryExhausted,
            CoreError::InvalidArgument(_)
            | CoreError::Config(_)
            | CoreError::Persistence(StoreError::InvalidKey(_)) => ErrorKind::InvalidArgument,
            CoreError::Persistence(_) => ErrorKind::PersistenceFault,
        }
    }
}
