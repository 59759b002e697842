// src/storage/reader.rs
//! Batch assembly from stored files
//!
//! One batch is one file: its whole content wrapped in the store's prefix
//! and suffix. A batch handed out is held in an in-flight set until the
//! consumer releases it (keep the file, retry later) or drops it (delete).

use crate::storage::config::PayloadDecoration;
use crate::storage::file_lock::{FileLock, DEFAULT_LOCK_TIMEOUT};
use crate::storage::orchestrator::{parse_batch_name, BatchFileOrchestrator, RemovalReason};
use crate::utils::errors::Result;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A framed, transmittable blob assembled from one stored file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// File name of the backing file
    pub id: String,
    pub payload: Bytes,
}

/// Reader bound to one store
pub struct BatchFileReader {
    orchestrator: Arc<BatchFileOrchestrator>,
    decoration: PayloadDecoration,
    in_flight: Mutex<HashSet<PathBuf>>,
    lock_timeout: Duration,
}

impl BatchFileReader {
    pub fn new(orchestrator: Arc<BatchFileOrchestrator>, decoration: PayloadDecoration) -> Self {
        Self {
            orchestrator,
            decoration,
            in_flight: Mutex::new(HashSet::new()),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn orchestrator(&self) -> &Arc<BatchFileOrchestrator> {
        &self.orchestrator
    }

    pub fn decoration(&self) -> &PayloadDecoration {
        &self.decoration
    }

    /// Read the oldest eligible file that is not already handed out
    ///
    /// Returns `None` when nothing is eligible. Empty files left behind by a
    /// failed first write are deleted on the way.
    pub fn read_next_batch(&self) -> Option<Batch> {
        let _entered = self.orchestrator.span().enter();

        loop {
            let mut in_flight = self.in_flight.lock();
            let path = self.orchestrator.get_readable_file(&in_flight)?;

            match self.read_file(&path) {
                Ok(content) if content.is_empty() => {
                    drop(in_flight);
                    debug!("Removing empty batch file {:?}", path);
                    self.orchestrator.delete_file(&path, RemovalReason::Invalid);
                }
                Ok(content) => {
                    let id = file_id(&path);
                    in_flight.insert(path);
                    debug!("Read batch {} ({} bytes)", id, content.len());
                    return Some(Batch {
                        id,
                        payload: Bytes::from(self.decoration.frame(&content)),
                    });
                }
                Err(e) if e.is_not_found() => {
                    // Dropped or evicted between selection and read
                    continue;
                }
                Err(e) => {
                    warn!("Failed to read batch file {:?}: {}", path, e);
                    return None;
                }
            }
        }
    }

    /// Read a specific file regardless of eligibility, framed
    pub fn read_file_framed(&self, path: &Path) -> Result<Batch> {
        let content = self.read_file(path)?;
        Ok(Batch {
            id: file_id(path),
            payload: Bytes::from(self.decoration.frame(&content)),
        })
    }

    /// Keep the file on disk and make it eligible again on the next poll
    pub fn release_batch(&self, id: &str) {
        let path = self.orchestrator.root_dir().join(id);
        if self.in_flight.lock().remove(&path) {
            debug!("Released batch {}", id);
        }
    }

    /// Delete the file behind a batch
    ///
    /// Unknown or already deleted ids are a no-op; a delete that fails
    /// (busy or externally held file) is logged and the file may resurface.
    pub fn drop_batch(&self, id: &str) {
        let _entered = self.orchestrator.span().enter();
        if parse_batch_name(id).is_none() {
            debug!("Ignoring drop of unknown batch id {:?}", id);
            return;
        }
        let path = self.orchestrator.root_dir().join(id);
        self.orchestrator.delete_file(&path, RemovalReason::Flushed);
        self.in_flight.lock().remove(&path);
    }

    /// Delete every file in the store, in flight or not
    pub fn drop_all_batches(&self) {
        let _entered = self.orchestrator.span().enter();
        let files = self.orchestrator.get_all_files();
        let count = files.len();
        for path in files {
            self.orchestrator.delete_file(&path, RemovalReason::Dropped);
        }
        self.in_flight.lock().clear();
        debug!("Dropped {} batches", count);
    }

    /// Number of batches currently handed out
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        let mut lock = FileLock::acquire_with_timeout(path, false, self.lock_timeout)?;
        let mut content = Vec::new();
        lock.file_mut().read_to_end(&mut content)?;
        Ok(content)
    }
}

fn file_id(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
