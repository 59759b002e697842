// src/storage/file_lock.rs
//! Advisory per-file lock
//!
//! Writers, the reader and eviction all take the same exclusive `flock`-style
//! lock on a batch file before touching it. The lock is released when the
//! guard drops, on every exit path.
//!
//! Caveat: the lock is advisory and tied to the open file description. A
//! lock held by a crashed process is released by the OS on most platforms,
//! but filesystems without `flock` support (some network mounts) may keep it
//! or ignore it. Callers treat lock failures as "skip this write / retry
//! later", never as fatal.

use crate::utils::errors::{PipelineError, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// How long a caller waits for a busy file by default
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(500);

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Exclusive lock on one batch file; the open handle is usable for I/O
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Try once, without waiting
    ///
    /// Returns `Ok(None)` when another holder owns the lock.
    pub fn try_acquire(path: &Path, create: bool) -> Result<Option<Self>> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(create)
            .open(path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                trace!("Acquired lock on {:?}", path);
                Ok(Some(Self {
                    file,
                    path: path.to_path_buf(),
                }))
            }
            Err(e) if is_contended(&e) => Ok(None),
            Err(e) => Err(PipelineError::Io(e)),
        }
    }

    /// Acquire, polling until `timeout` elapses
    pub fn acquire_with_timeout(path: &Path, create: bool, timeout: Duration) -> Result<Self> {
        let start = Instant::now();

        loop {
            if let Some(lock) = Self::try_acquire(path, create)? {
                return Ok(lock);
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                warn!("Gave up waiting for lock on {:?} after {:?}", path, elapsed);
                return Err(PipelineError::LockTimeout {
                    path: path.to_path_buf(),
                    elapsed,
                });
            }

            std::thread::sleep(LOCK_POLL_INTERVAL);
        }
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    /// Whether the locked path still exists on disk
    ///
    /// A file may be deleted by a reader or by eviction between the moment a
    /// writer opened it and the moment the writer got the lock.
    pub fn is_still_linked(&self) -> bool {
        self.path.exists()
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            // The descriptor is closed right after, which drops the lock anyway
            trace!("Explicit unlock of {:?} failed: {}", self.path, e);
        }
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
