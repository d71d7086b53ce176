use crate::StoreError;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;

/// An advisory `flock` held until drop.
///
/// Two `FileLock`s on the same path conflict even within one process, so the
/// same primitive serializes request threads and separate CLI invocations.
#[derive(Debug)]
pub struct FileLock {
    file: File,
}

impl FileLock {
    /// Block until no other holder remains.
    pub fn exclusive(path: &Path) -> Result<Self, StoreError> {
        Self::acquire(path, |f| f.lock_exclusive())
    }

    /// Block until no exclusive holder remains.
    pub fn shared(path: &Path) -> Result<Self, StoreError> {
        Self::acquire(path, |f| f.lock_shared())
    }

    /// `None` when someone else holds the lock in any mode.
    pub fn try_exclusive(path: &Path) -> Result<Option<Self>, StoreError> {
        let file = open_for_locking(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(lock_failed(path, &e)),
        }
    }

    fn acquire(path: &Path, lock: impl FnOnce(&File) -> io::Result<()>) -> Result<Self, StoreError> {
        let file = open_for_locking(path)?;
        lock(&file).map_err(|e| lock_failed(path, &e))?;
        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn open_for_locking(path: &Path) -> Result<File, StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)?;
    Ok(file)
}

fn lock_failed(path: &Path, e: &io::Error) -> StoreError {
    StoreError::LockFailed(format!("{}: {e}", path.display()))
}
