//! Transactional persistence for Siren.
//!
//! This crate provides the storage collaborator the dispatch core runs against:
//! the [`StateStore`] trait (keyed reads plus a locked, all-or-nothing
//! [`UnitOfWork`] spanning several entities), a durable [`FileStore`] built on
//! atomic JSON records, per-row `flock`s and a [`WriteAheadLog`] of
//! before-images, a volatile [`MemoryStore`], and store-wide integrity
//! verification.

pub mod file;
pub mod integrity;
pub mod layout;
pub mod locks;
pub mod memory;
pub mod records;
pub mod unit;
pub mod wal;

pub use file::FileStore;
pub use integrity::{check_invariants, verify_store_integrity, IntegrityFailure, IntegrityReport};
pub use layout::{Collection, StoreLayout, STORE_FORMAT_VERSION};
pub use locks::FileLock;
pub use memory::MemoryStore;
pub use records::RecordStore;
pub use unit::{OpKind, Record, RowKey, Staging, UnitOfWork};
pub use wal::{BeforeImage, WalEntry, WriteAheadLog};

use siren_schema::{Ambulance, Incident, IncidentId, InventoryItem, ItemKey, KeyError, UnitId};
use std::path::Path;
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("integrity check failed for '{key}': expected {expected}, got {actual}")]
    IntegrityFailure {
        key: String,
        expected: String,
        actual: String,
    },
    #[error("invalid record key: {0}")]
    InvalidKey(#[from] KeyError),
    #[error("row {0} is not locked by this unit of work")]
    Unlocked(String),
    #[error("record at {row} does not hold the expected entity")]
    RecordMismatch { row: String },
    #[error("store format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("lock acquisition failed: {0}")]
    LockFailed(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence collaborator for the dispatch core.
///
/// Plain reads observe committed state only. All mutation goes through
/// [`StateStore::begin`], which locks the named rows (in [`RowKey`] order, so
/// concurrent units can never deadlock) until the returned unit is committed
/// or dropped. Rows outside a unit are never blocked by it.
pub trait StateStore: Send + Sync {
    fn name(&self) -> &str;

    fn incident(&self, id: &IncidentId) -> Result<Option<Incident>, StoreError>;

    fn incidents(&self) -> Result<Vec<Incident>, StoreError>;

    fn ambulance(&self, id: &UnitId) -> Result<Option<Ambulance>, StoreError>;

    fn ambulances(&self) -> Result<Vec<Ambulance>, StoreError>;

    fn item(&self, key: &ItemKey) -> Result<Option<InventoryItem>, StoreError>;

    fn items(&self) -> Result<Vec<InventoryItem>, StoreError>;

    /// Open a unit of work holding exclusive locks on `rows`.
    fn begin(&self, op: OpKind, rows: &[RowKey]) -> Result<Box<dyn UnitOfWork + '_>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display_unlocked() {
        let e = StoreError::Unlocked("incident/I1".to_owned());
        assert!(e.to_string().contains("incident/I1"));
    }

    #[test]
    fn store_error_display_integrity_failure() {
        let e = StoreError::IntegrityFailure {
            key: "k".to_owned(),
            expected: "exp".to_owned(),
            actual: "act".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("exp"));
        assert!(msg.contains("act"));
    }

    #[test]
    fn store_error_display_version_mismatch() {
        let e = StoreError::VersionMismatch {
            expected: 2,
            found: 1,
        };
        let msg = e.to_string();
        assert!(msg.contains('2'));
        assert!(msg.contains('1'));
    }

    #[test]
    fn store_error_from_key_error() {
        let key_err = siren_schema::validate_key("unit id", "").unwrap_err();
        let e: StoreError = key_err.into();
        assert!(matches!(e, StoreError::InvalidKey(_)));
    }
}
