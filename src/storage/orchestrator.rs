// src/storage/orchestrator.rs
//! Batch file orchestration for one store
//!
//! Decides which file the next write goes to, which file is old enough to be
//! read, and which files must go to keep the store under its disk quota.
//!
//! Files are named after their creation time in milliseconds, so the
//! directory listing alone gives chronological order; there is no index.
//!
//! # Recency windows
//!
//! A file is reused for writing only while its last write is younger than
//! `recent_delay * 0.95`, and becomes readable only once its last write is
//! older than `recent_delay * 1.05`. The gap keeps the two sets disjoint.

use crate::observability::{BATCH_CLOSED, BATCH_DELETED, PENDING_BATCHES};
use crate::storage::config::FilePersistenceConfig;
use crate::storage::file_lock::FileLock;
use crate::utils::time::TimeProvider;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn, Span};

const WRITE_DELAY_FACTOR: f64 = 0.95;
const READ_DELAY_FACTOR: f64 = 1.05;

/// Eviction never waits long on a busy file; it moves on to the next one
const EVICTION_LOCK_TIMEOUT: Duration = Duration::from_millis(50);

/// Why a batch file left the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Uploaded or terminally rejected
    Flushed,
    /// Evicted to stay under the disk quota
    Purged,
    /// Older than the obsolete threshold
    Obsolete,
    /// Empty or unreadable
    Invalid,
    /// Explicit data clear or consent wipe
    Dropped,
}

impl RemovalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemovalReason::Flushed => "flushed",
            RemovalReason::Purged => "purged",
            RemovalReason::Obsolete => "obsolete",
            RemovalReason::Invalid => "invalid",
            RemovalReason::Dropped => "dropped",
        }
    }
}

/// A batch file found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub path: PathBuf,
    /// Creation time decoded from the file name
    pub created_ms: i64,
    pub size: u64,
}

impl StoredFile {
    pub fn name(&self) -> String {
        batch_name(&self.path)
    }
}

/// Parse a batch file name; anything but a plain decimal timestamp is ignored
pub fn parse_batch_name(name: &str) -> Option<i64> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

fn batch_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// File currently receiving appends
#[derive(Debug, Clone)]
struct ActiveFile {
    path: PathBuf,
    created_ms: i64,
    item_count: u64,
    last_write_ms: i64,
}

#[derive(Debug, Default)]
struct OrchestratorState {
    active: Option<ActiveFile>,
    /// Last write time of files written by this process, by file name
    last_writes: HashMap<String, i64>,
}

/// Storage orchestrator for one directory
pub struct BatchFileOrchestrator {
    root_dir: PathBuf,
    config: FilePersistenceConfig,
    clock: Arc<dyn TimeProvider>,
    label: String,
    span: Span,
    recent_read_delay_ms: i64,
    recent_write_delay_ms: i64,
    state: Mutex<OrchestratorState>,
    last_cleanup_ms: AtomicI64,
    pending_files: AtomicUsize,
}

impl BatchFileOrchestrator {
    /// Create an orchestrator; the root directory is created on first use
    pub fn new(
        root_dir: impl Into<PathBuf>,
        config: FilePersistenceConfig,
        clock: Arc<dyn TimeProvider>,
        label: impl Into<String>,
    ) -> Self {
        let label = label.into();
        let recent = config.recent_delay_ms as f64;

        Self {
            root_dir: root_dir.into(),
            span: tracing::info_span!("store", store = %label),
            label,
            clock,
            recent_read_delay_ms: (recent * READ_DELAY_FACTOR).round() as i64,
            recent_write_delay_ms: (recent * WRITE_DELAY_FACTOR).round() as i64,
            config,
            state: Mutex::new(OrchestratorState::default()),
            last_cleanup_ms: AtomicI64::new(0),
            pending_files: AtomicUsize::new(0),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn config(&self) -> &FilePersistenceConfig {
        &self.config
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Number of files the store held at the last listing
    pub fn pending_batches(&self) -> usize {
        self.pending_files.load(Ordering::Relaxed)
    }

    /// Pick the file the next item of `size_hint` bytes goes to
    ///
    /// Starts a new file when there is no active file, the active file was
    /// not written to recently, appending would exceed the batch size, or the
    /// item count is reached. Evicts the oldest files first if the store
    /// would not fit `size_hint` more bytes.
    pub fn get_writable_file(&self, size_hint: u64) -> Option<PathBuf> {
        let _entered = self.span.enter();
        if !self.ensure_root_dir() {
            return None;
        }

        let now = self.clock.now_millis();
        let mut state = self.state.lock();
        let mut files = self.list_batch_files();

        if self.can_do_cleanup(now) {
            files = self.delete_obsolete_files(files, now, &mut state);
            self.last_cleanup_ms.store(now, Ordering::Relaxed);
        }
        files = self.free_space_if_needed(files, size_hint, &mut state);

        if let Some(path) = self.reusable_file(&files, size_hint, now, &mut state) {
            return Some(path);
        }
        self.create_new_file(now, &mut state)
    }

    /// Oldest file whose last write is outside the read window
    pub fn get_readable_file(&self, exclude: &HashSet<PathBuf>) -> Option<PathBuf> {
        let _entered = self.span.enter();
        if !self.ensure_root_dir() {
            return None;
        }

        let now = self.clock.now_millis();
        let mut state = self.state.lock();
        let files = self.delete_obsolete_files(self.list_batch_files(), now, &mut state);
        self.last_cleanup_ms.store(now, Ordering::Relaxed);
        self.set_pending(files.len());

        let names: HashSet<String> = files.iter().map(StoredFile::name).collect();
        state.last_writes.retain(|name, _| names.contains(name));

        files
            .into_iter()
            .find(|file| !exclude.contains(&file.path) && self.is_readable(file, now, &state))
            .map(|file| file.path)
    }

    /// Every batch file, oldest first
    pub fn get_all_files(&self) -> Vec<PathBuf> {
        if !self.ensure_root_dir() {
            return Vec::new();
        }
        self.list_batch_files().into_iter().map(|f| f.path).collect()
    }

    /// Files to upload on shutdown, recent ones included
    pub fn get_flushable_files(&self) -> Vec<PathBuf> {
        self.get_all_files()
    }

    /// Total bytes currently held by the store
    pub fn disk_usage(&self) -> u64 {
        self.list_batch_files().iter().map(|f| f.size).sum()
    }

    /// Evict the oldest files until the store fits its quota
    pub fn enforce_disk_quota(&self) {
        let _entered = self.span.enter();
        let mut state = self.state.lock();
        let files = self.list_batch_files();
        self.free_space_if_needed(files, 0, &mut state);
    }

    /// Delete a batch file under its lock
    ///
    /// Returns whether this call removed the file. A missing file, or one
    /// whose lock cannot be taken in time, is reported as `false` and never
    /// raises.
    pub fn delete_file(&self, path: &Path, reason: RemovalReason) -> bool {
        let _entered = self.span.enter();
        let mut state = self.state.lock();
        self.delete_locked(path, reason, &mut state)
    }

    /// Claim a free file name for a file created at `created_ms`
    ///
    /// An empty placeholder is created so no writer of this store can pick
    /// the same name; the caller renames its file over it. On collision the
    /// timestamp is bumped until a free name is found.
    pub fn reserve_path(&self, created_ms: i64) -> Option<PathBuf> {
        let _entered = self.span.enter();
        if !self.ensure_root_dir() {
            return None;
        }

        let mut state = self.state.lock();
        let path = self.create_unique_file(created_ms)?;
        // Counts as a fresh write so the empty placeholder is not read
        state
            .last_writes
            .insert(batch_name(&path), self.clock.now_millis());
        self.shift_pending(1);
        Some(path)
    }

    /// Stop tracking a file that was moved out of this store
    pub fn forget_file(&self, path: &Path) {
        let mut state = self.state.lock();
        self.forget_locked(path, &mut state);
    }

    fn ensure_root_dir(&self) -> bool {
        if self.root_dir.exists() {
            if !self.root_dir.is_dir() {
                error!("The provided root file is not a directory: {:?}", self.root_dir);
                return false;
            }
            return true;
        }

        match fs::create_dir_all(&self.root_dir) {
            Ok(()) => {
                debug!("Created store directory {:?}", self.root_dir);
                true
            }
            Err(e) => {
                error!("The provided root dir can't be created {:?}: {}", self.root_dir, e);
                false
            }
        }
    }

    fn list_batch_files(&self) -> Vec<StoredFile> {
        let entries = match fs::read_dir(&self.root_dir) {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to list {:?}: {}", self.root_dir, e);
                }
                return Vec::new();
            }
        };

        let mut files: Vec<StoredFile> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name();
                let created_ms = parse_batch_name(&name.to_string_lossy())?;
                let metadata = entry.metadata().ok()?;
                if !metadata.is_file() {
                    return None;
                }
                Some(StoredFile {
                    path: entry.path(),
                    created_ms,
                    size: metadata.len(),
                })
            })
            .collect();

        files.sort_by(|a, b| a.created_ms.cmp(&b.created_ms).then_with(|| a.path.cmp(&b.path)));
        files
    }

    fn can_do_cleanup(&self, now: i64) -> bool {
        now - self.last_cleanup_ms.load(Ordering::Relaxed) > self.config.cleanup_frequency_ms as i64
    }

    /// Files from a previous process fall back to their creation time
    fn last_write_ms(file: &StoredFile, state: &OrchestratorState) -> i64 {
        state
            .last_writes
            .get(&file.name())
            .copied()
            .unwrap_or(file.created_ms)
            .max(file.created_ms)
    }

    fn is_readable(&self, file: &StoredFile, now: i64, state: &OrchestratorState) -> bool {
        now - Self::last_write_ms(file, state) >= self.recent_read_delay_ms
    }

    fn reusable_file(
        &self,
        files: &[StoredFile],
        size_hint: u64,
        now: i64,
        state: &mut OrchestratorState,
    ) -> Option<PathBuf> {
        let OrchestratorState {
            active,
            last_writes,
        } = state;
        let active = active.as_mut()?;
        let latest = files.last()?;

        if latest.path != active.path {
            // Written by a previous process, deleted, or created externally:
            // the item count is unknown, so start fresh
            return None;
        }

        let is_recent = now - active.last_write_ms < self.recent_write_delay_ms;
        let is_obsolete = now - active.created_ms >= self.config.old_file_threshold_ms as i64;
        let has_room = latest.size + size_hint <= self.config.max_batch_size_bytes;
        let has_slot = active.item_count < self.config.max_items_per_batch;

        if is_recent && !is_obsolete && has_room && has_slot {
            active.item_count += 1;
            active.last_write_ms = now;
            last_writes.insert(latest.name(), now);
            Some(active.path.clone())
        } else {
            trace!(
                "Rotating {:?} (recent: {}, obsolete: {}, room: {}, slot: {})",
                active.path,
                is_recent,
                is_obsolete,
                has_room,
                has_slot
            );
            None
        }
    }

    fn create_new_file(&self, now: i64, state: &mut OrchestratorState) -> Option<PathBuf> {
        if let Some(closed) = state.active.take() {
            self.on_batch_closed(&closed);
        }

        let path = self.create_unique_file(now)?;
        let created_ms = parse_batch_name(&batch_name(&path)).unwrap_or(now);

        state.last_writes.insert(batch_name(&path), now);
        state.active = Some(ActiveFile {
            path: path.clone(),
            created_ms,
            item_count: 1,
            last_write_ms: now,
        });

        self.shift_pending(1);
        debug!("Started new batch file {:?}", path);

        Some(path)
    }

    fn create_unique_file(&self, start_ms: i64) -> Option<PathBuf> {
        let mut timestamp = start_ms;
        loop {
            let path = self.root_dir.join(timestamp.to_string());
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Some(path),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => timestamp += 1,
                Err(e) => {
                    error!("Failed to create batch file {:?}: {}", path, e);
                    return None;
                }
            }
        }
    }

    fn on_batch_closed(&self, closed: &ActiveFile) {
        metrics::counter!(BATCH_CLOSED, "store" => self.label.clone()).increment(1);
        debug!(
            "Closed batch {:?} with {} items (last write at {})",
            closed.path, closed.item_count, closed.last_write_ms
        );
    }

    fn delete_obsolete_files(
        &self,
        files: Vec<StoredFile>,
        now: i64,
        state: &mut OrchestratorState,
    ) -> Vec<StoredFile> {
        // Measured from the last write: a file rotated at the threshold still
        // holds fresh items that have not been read yet
        let threshold = now - self.config.old_file_threshold_ms as i64;
        files
            .into_iter()
            .filter(|file| {
                if Self::last_write_ms(file, state) < threshold {
                    debug!("Deleting obsolete batch {:?}", file.path);
                    self.delete_locked(&file.path, RemovalReason::Obsolete, state);
                    false
                } else {
                    true
                }
            })
            .collect()
    }

    fn free_space_if_needed(
        &self,
        files: Vec<StoredFile>,
        incoming: u64,
        state: &mut OrchestratorState,
    ) -> Vec<StoredFile> {
        let size_on_disk: u64 = files.iter().map(|f| f.size).sum();
        let max_disk_space = self.config.max_disk_space_bytes;
        if size_on_disk + incoming <= max_disk_space {
            return files;
        }

        let mut size_to_free = size_on_disk + incoming - max_disk_space;
        warn!(
            "Too much disk space used ({}/{}): cleaning up to free {} bytes",
            size_on_disk, max_disk_space, size_to_free
        );

        let mut kept = Vec::with_capacity(files.len());
        for file in files {
            if size_to_free > 0 && self.delete_locked(&file.path, RemovalReason::Purged, state) {
                size_to_free = size_to_free.saturating_sub(file.size);
            } else {
                kept.push(file);
            }
        }

        if size_to_free > 0 {
            warn!("Could not free {} more bytes, files are busy", size_to_free);
        }
        kept
    }

    fn delete_locked(&self, path: &Path, reason: RemovalReason, state: &mut OrchestratorState) -> bool {
        let lock = match FileLock::acquire_with_timeout(path, false, EVICTION_LOCK_TIMEOUT) {
            Ok(lock) => lock,
            Err(e) if e.is_not_found() => {
                self.forget_locked(path, state);
                return false;
            }
            Err(e) => {
                warn!("Could not lock {:?} for deletion: {}", path, e);
                return false;
            }
        };

        let removed = fs::remove_file(path);
        drop(lock);

        match removed {
            Ok(()) => {
                self.forget_locked(path, state);
                metrics::counter!(
                    BATCH_DELETED,
                    "store" => self.label.clone(),
                    "reason" => reason.as_str()
                )
                .increment(1);
                debug!("Deleted batch {:?} ({})", path, reason.as_str());
                true
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.forget_locked(path, state);
                false
            }
            Err(e) => {
                warn!("Failed to delete batch {:?}: {}", path, e);
                false
            }
        }
    }

    fn forget_locked(&self, path: &Path, state: &mut OrchestratorState) {
        state.last_writes.remove(&batch_name(path));
        if state.active.as_ref().is_some_and(|active| active.path == path) {
            if let Some(closed) = state.active.take() {
                self.on_batch_closed(&closed);
            }
        }

        self.shift_pending(-1);
    }

    fn shift_pending(&self, delta: isize) {
        let previous = self
            .pending_files
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_add_signed(delta))
            })
            .unwrap_or(0);
        metrics::gauge!(PENDING_BATCHES, "store" => self.label.clone())
            .set(previous.saturating_add_signed(delta) as f64);
    }

    fn set_pending(&self, count: usize) {
        let previous = self.pending_files.swap(count, Ordering::Relaxed);
        if previous != count {
            info!("Store {} holds {} batches", self.label, count);
        }
        metrics::gauge!(PENDING_BATCHES, "store" => self.label.clone()).set(count as f64);
    }
}
