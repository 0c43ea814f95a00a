//! Lock manager (C8): the intra-process writer mutex plus optional
//! advisory OS file locking across processes.

use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs2::FileExt;
use once_cell::sync::Lazy;

use crate::error::{CaptureError, Result};

/// Process-wide set of paths currently open for write. Torn down per-path
/// when the owning `WriterGuard` drops.
static OPEN_WRITERS: Lazy<Mutex<HashSet<PathBuf>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Held for the lifetime of a write-mode open. A second writer in the
/// same process for the same path fails with `AlreadyOpen`.
pub struct WriterGuard {
    key: PathBuf,
}

impl WriterGuard {
    pub fn acquire(path: &Path) -> Result<WriterGuard> {
        let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let mut writers = OPEN_WRITERS.lock().unwrap();
        if !writers.insert(key.clone()) {
            return Err(CaptureError::AlreadyOpen);
        }
        Ok(WriterGuard { key })
    }
}

impl Drop for WriterGuard {
    fn drop(&mut self) {
        OPEN_WRITERS.lock().unwrap().remove(&self.key);
    }
}

/// Takes the optional advisory OS lock exclusively, for a write-mode
/// open. The lock is released automatically when `file`'s descriptor is
/// closed, so no separate guard type is needed. Contention fails fast
/// (no blocking, no timeout).
pub fn lock_exclusive(file: &File) -> Result<()> {
    file.try_lock_exclusive()
        .map_err(|_| CaptureError::AlreadyOpen)
}

/// Takes the optional advisory OS lock in shared mode, for a read-mode
/// open.
pub fn lock_shared(file: &File) -> Result<()> {
    file.try_lock_shared()
        .map_err(|_| CaptureError::AlreadyOpen)
}
