use crate::layout::StoreLayout;
use crate::records::write_atomic;
use crate::{OpKind, RowKey, StoreError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

static SEQ: AtomicU64 = AtomicU64::new(0);

/// What a record file held before a commit touched it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum BeforeImage {
    /// No file existed; undoing means deleting whatever the commit wrote.
    Absent(PathBuf),
    /// The file existed with these bytes.
    Present { path: PathBuf, content: String },
}

impl BeforeImage {
    fn restore(&self) -> Result<(), StoreError> {
        match self {
            Self::Absent(path) => match fs::remove_file(path) {
                Ok(()) => debug!("undo: deleted {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            },
            Self::Present { path, content } => {
                write_atomic(path, content)?;
                debug!("undo: rewrote {}", path.display());
            }
        }
        Ok(())
    }
}

/// One in-flight commit as recorded on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    pub op_id: String,
    pub kind: OpKind,
    pub subject: String,
    pub rows: Vec<RowKey>,
    pub timestamp: String,
    pub before_images: Vec<BeforeImage>,
}

impl WalEntry {
    pub fn touches(&self, row: &RowKey) -> bool {
        self.rows.contains(row)
    }
}

/// Journal of before-images for multi-record commits.
///
/// A commit first lands one entry holding the prior contents of every record
/// it will replace, then writes the records, then drops the entry. Entries
/// left behind belong to interrupted commits; [`recover`](Self::recover)
/// puts their before-images back.
pub struct WriteAheadLog {
    dir: PathBuf,
}

impl WriteAheadLog {
    pub fn new(layout: &StoreLayout) -> Self {
        Self {
            dir: layout.wal_dir(),
        }
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(Into::into)
    }

    /// Land the entry for a commit over `rows` before any record is written.
    pub fn begin(
        &self,
        kind: OpKind,
        rows: Vec<RowKey>,
        before_images: Vec<BeforeImage>,
    ) -> Result<WalEntry, StoreError> {
        let subject = rows
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let now = chrono::Utc::now();
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        let digest = blake3::hash(format!("{subject}:{}:{seq}", std::process::id()).as_bytes());
        let entry = WalEntry {
            op_id: format!("{}-{}", now.format("%Y%m%d%H%M%S%3f"), &digest.to_hex()[..12]),
            kind,
            subject,
            rows,
            timestamp: now.to_rfc3339(),
            before_images,
        };
        fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_string_pretty(&entry)?;
        write_atomic(&self.entry_path(&entry.op_id), &content)?;
        debug!(op_id = %entry.op_id, "journal open: {} on {}", entry.kind, entry.subject);
        Ok(entry)
    }

    /// Drop the entry once every record write has landed. Idempotent.
    pub fn commit(&self, op_id: &str) -> Result<(), StoreError> {
        if remove_if_present(&self.entry_path(op_id))? {
            crate::fsync_dir(&self.dir)?;
            debug!(op_id, "journal closed");
        }
        Ok(())
    }

    /// Entries of commits that never closed, in the order they were opened.
    ///
    /// Unparseable entries are discarded: entry files are written atomically,
    /// so a torn one never had its records touched.
    pub fn pending(&self) -> Result<Vec<WalEntry>, StoreError> {
        let listing = match fs::read_dir(&self.dir) {
            Ok(listing) => listing,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut entries = Vec::new();
        for item in listing {
            let path = item?.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            let parsed = fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|raw| serde_json::from_str::<WalEntry>(&raw).map_err(|e| e.to_string()));
            match parsed {
                Ok(entry) => entries.push(entry),
                // closed by a concurrent commit after the listing
                Err(_) if !path.exists() => {}
                Err(reason) => {
                    warn!("discarding journal entry {}: {reason}", path.display());
                    remove_if_present(&path)?;
                }
            }
        }
        entries.sort_by(|a, b| a.op_id.cmp(&b.op_id));
        Ok(entries)
    }

    /// Put back one entry's before-images, last write first, then drop it.
    pub fn rollback(&self, entry: &WalEntry) -> Result<(), StoreError> {
        for image in entry.before_images.iter().rev() {
            image.restore()?;
        }
        remove_if_present(&self.entry_path(&entry.op_id))?;
        Ok(())
    }

    /// Undo every interrupted commit, newest first, and report how many.
    ///
    /// The caller must hold the store lock exclusively; otherwise a live
    /// commit would look interrupted.
    pub fn recover(&self) -> Result<usize, StoreError> {
        let entries = self.pending()?;
        for entry in entries.iter().rev() {
            info!(
                op_id = %entry.op_id,
                "undoing interrupted {} on {}", entry.kind, entry.subject
            );
            self.rollback(entry)?;
        }
        if !entries.is_empty() {
            info!("journal recovery undid {} commit(s)", entries.len());
        }
        Ok(entries.len())
    }

    fn entry_path(&self, op_id: &str) -> PathBuf {
        self.dir.join(format!("{op_id}.json"))
    }
}

fn remove_if_present(path: &Path) -> Result<bool, StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
