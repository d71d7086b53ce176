use crate::records::write_atomic;
use crate::{RowKey, StoreError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;

/// On-disk format revision. Bump when old stores can no longer be read.
pub const STORE_FORMAT_VERSION: u32 = 1;

/// One directory of records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Collection {
    Incidents,
    Ambulances,
    Inventory,
}

impl Collection {
    pub const ALL: [Collection; 3] = [
        Collection::Incidents,
        Collection::Ambulances,
        Collection::Inventory,
    ];

    pub fn dir_name(self) -> &'static str {
        match self {
            Collection::Incidents => "incidents",
            Collection::Ambulances => "ambulances",
            Collection::Inventory => "inventory",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Directory layout of a durable Siren store.
///
/// ```text
/// <root>/store/version
/// <root>/store/.lock
/// <root>/store/{incidents,ambulances,inventory}/<key>
/// <root>/store/wal/<op_id>.json
/// <root>/store/locks/<collection>-<key>.lock
/// ```
#[derive(Debug, Clone)]
pub struct StoreLayout {
    store: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct FormatMarker {
    format_version: u32,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        Self {
            store: root.join("store"),
        }
    }

    pub fn collection_dir(&self, collection: Collection) -> PathBuf {
        self.store.join(collection.dir_name())
    }

    pub fn record_path(&self, row: &RowKey) -> PathBuf {
        self.collection_dir(row.collection()).join(row.key())
    }

    pub fn wal_dir(&self) -> PathBuf {
        self.store.join("wal")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.store.join("locks")
    }

    /// Per-row lock file, e.g. `locks/ambulances-AMB-01.lock`.
    pub fn row_lock(&self, row: &RowKey) -> PathBuf {
        self.locks_dir()
            .join(format!("{}-{}.lock", row.collection(), row.key()))
    }

    /// Store-wide lock taken shared by commits and exclusive by recovery.
    pub fn lock_file(&self) -> PathBuf {
        self.store.join(".lock")
    }

    fn marker_path(&self) -> PathBuf {
        self.store.join("version")
    }

    pub fn is_initialized(&self) -> bool {
        self.marker_path().is_file()
    }

    /// Create every directory and stamp the format marker on first use.
    /// An existing store is checked instead of re-stamped.
    pub fn initialize(&self) -> Result<(), StoreError> {
        let dirs = Collection::ALL
            .into_iter()
            .map(|c| self.collection_dir(c))
            .chain([self.wal_dir(), self.locks_dir()]);
        for dir in dirs {
            fs::create_dir_all(dir)?;
        }
        if self.is_initialized() {
            return self.check_format();
        }
        let marker = serde_json::to_string_pretty(&FormatMarker {
            format_version: STORE_FORMAT_VERSION,
        })?;
        write_atomic(&self.marker_path(), &marker)
    }

    /// Refuse stores written in a different format revision.
    pub fn check_format(&self) -> Result<(), StoreError> {
        let raw = match fs::read_to_string(self.marker_path()) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::Unavailable(format!(
                    "no store at {}",
                    self.store.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };
        let marker: FormatMarker = serde_json::from_str(&raw)?;
        match marker.format_version {
            STORE_FORMAT_VERSION => Ok(()),
            found => Err(StoreError::VersionMismatch {
                expected: STORE_FORMAT_VERSION,
                found,
            }),
        }
    }
}
