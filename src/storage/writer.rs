// src/storage/writer.rs
//! Append serialized items to the orchestrator-selected batch file
//!
//! Each write takes the file's advisory lock for the duration of the
//! append. Nothing is buffered in memory: if serialization fails, the item
//! is too large, or the lock cannot be taken in time, the item is dropped
//! and the producer thread carries on.

use crate::observability::WRITE_DROPPED;
use crate::storage::config::PayloadDecoration;
use crate::storage::file_lock::{FileLock, DEFAULT_LOCK_TIMEOUT};
use crate::storage::orchestrator::BatchFileOrchestrator;
use crate::utils::errors::{PipelineError, Result};
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Why a write did not reach disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropCause {
    Serialization,
    Empty,
    TooLarge,
    NoFile,
    Lock,
    Io,
    Consent,
}

impl DropCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropCause::Serialization => "serialization",
            DropCause::Empty => "empty",
            DropCause::TooLarge => "too_large",
            DropCause::NoFile => "no_file",
            DropCause::Lock => "lock",
            DropCause::Io => "io",
            DropCause::Consent => "consent",
        }
    }
}

pub(crate) fn record_drop(store: &str, cause: DropCause) {
    metrics::counter!(
        WRITE_DROPPED,
        "store" => store.to_string(),
        "cause" => cause.as_str()
    )
    .increment(1);
}

/// File writer bound to one store
pub struct BatchFileWriter {
    orchestrator: Arc<BatchFileOrchestrator>,
    separator: Vec<u8>,
    lock_timeout: Duration,
}

impl BatchFileWriter {
    pub fn new(orchestrator: Arc<BatchFileOrchestrator>, decoration: &PayloadDecoration) -> Self {
        Self {
            orchestrator,
            separator: decoration.separator.clone(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn orchestrator(&self) -> &Arc<BatchFileOrchestrator> {
        &self.orchestrator
    }

    /// Serialize and persist one event; returns whether it reached disk
    pub fn write_event<T: Serialize>(&self, event: &T) -> bool {
        match serde_json::to_vec(event) {
            Ok(bytes) => self.write_bytes(&bytes),
            Err(e) => {
                let _entered = self.orchestrator.span().enter();
                warn!("Dropping event that failed to serialize: {}", e);
                record_drop(self.orchestrator.label(), DropCause::Serialization);
                false
            }
        }
    }

    /// Persist one pre-serialized item; returns whether it reached disk
    pub fn write_bytes(&self, item: &[u8]) -> bool {
        let _entered = self.orchestrator.span().enter();
        match self.try_write(item) {
            Ok(()) => {
                // Concurrent writers may have raced past the quota check
                self.orchestrator.enforce_disk_quota();
                true
            }
            Err((cause, e)) => {
                match cause {
                    DropCause::Empty => debug!("Ignoring empty item"),
                    _ => warn!("Dropping item of {} bytes: {}", item.len(), e),
                }
                record_drop(self.orchestrator.label(), cause);
                false
            }
        }
    }

    fn try_write(&self, item: &[u8]) -> std::result::Result<(), (DropCause, PipelineError)> {
        if item.is_empty() {
            return Err((
                DropCause::Empty,
                PipelineError::StorageFailed("empty item".to_string()),
            ));
        }

        let limit = self.orchestrator.config().item_size_limit();
        let size = item.len() as u64;
        if size > limit {
            return Err((DropCause::TooLarge, PipelineError::ItemTooLarge { size, limit }));
        }

        let size_hint = size + self.separator.len() as u64;
        let path = self.orchestrator.get_writable_file(size_hint).ok_or_else(|| {
            (
                DropCause::NoFile,
                PipelineError::StorageFailed("no writable file available".to_string()),
            )
        })?;

        self.append(&path, item).map_err(|e| match e {
            PipelineError::LockTimeout { .. } => (DropCause::Lock, e),
            other => (DropCause::Io, other),
        })
    }

    fn append(&self, path: &Path, item: &[u8]) -> Result<()> {
        // The orchestrator creates every batch file; a missing one was moved
        // or deleted while this write waited, and must not be recreated
        let mut lock = FileLock::acquire_with_timeout(path, false, self.lock_timeout)?;

        if !lock.is_still_linked() {
            return Err(PipelineError::StorageFailed(format!(
                "{:?} was removed while waiting for its lock",
                path
            )));
        }

        let is_first = lock.file().metadata()?.len() == 0;
        let mut buffer = Vec::with_capacity(self.separator.len() + item.len());
        if !is_first {
            buffer.extend_from_slice(&self.separator);
        }
        buffer.extend_from_slice(item);

        // Single write call so a reader never sees a separator without its item
        lock.file_mut().write_all(&buffer)?;
        lock.file_mut().flush()?;
        Ok(())
    }
}
