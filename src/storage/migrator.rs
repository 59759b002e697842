// src/storage/migrator.rs
//! Consent-driven data migration between the pending and authorized stores
//!
//! Data only ever moves pending → authorized, or gets deleted. Migrations
//! run on one serial worker thread per feature so consecutive consent
//! changes apply in the order they happened, off the caller's thread.

use crate::storage::consent::TrackingConsent;
use crate::storage::file_lock::FileLock;
use crate::storage::orchestrator::{parse_batch_name, BatchFileOrchestrator, RemovalReason};
use crate::utils::errors::{PipelineError, Result};
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const MIGRATION_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

/// What happens to already authorized data when consent is revoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationPolicy {
    /// Keep it; it is still uploaded
    #[default]
    Retain,
    /// Delete everything in the authorized store
    PurgeAuthorized,
}

/// Work resulting from one consent transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOperation {
    Noop,
    WipePending,
    MovePendingToAuthorized,
    WipeAuthorized,
}

impl MigrationOperation {
    /// Decide what a transition implies; `previous` is `None` at startup
    pub fn plan(
        previous: Option<TrackingConsent>,
        current: TrackingConsent,
        policy: RevocationPolicy,
    ) -> Self {
        use crate::storage::consent::TrackingConsent::*;

        match (previous, current) {
            // Pending data left by an earlier process has unknown consent
            (None, _) => MigrationOperation::WipePending,
            (Some(Pending), Granted) => MigrationOperation::MovePendingToAuthorized,
            (Some(Pending), NotGranted) => MigrationOperation::WipePending,
            (Some(Granted), NotGranted) => match policy {
                RevocationPolicy::Retain => MigrationOperation::Noop,
                RevocationPolicy::PurgeAuthorized => MigrationOperation::WipeAuthorized,
            },
            (Some(Granted), Pending) | (Some(NotGranted), Pending) => MigrationOperation::Noop,
            (Some(NotGranted), Granted) => MigrationOperation::Noop,
            (Some(Pending), Pending) | (Some(Granted), Granted) | (Some(NotGranted), NotGranted) => {
                MigrationOperation::Noop
            }
        }
    }
}

/// Outcome of one migration run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub moved: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// Moves or deletes files between the two stores of a feature
pub struct ConsentMigrator {
    pending: Arc<BatchFileOrchestrator>,
    authorized: Arc<BatchFileOrchestrator>,
}

impl ConsentMigrator {
    pub fn new(pending: Arc<BatchFileOrchestrator>, authorized: Arc<BatchFileOrchestrator>) -> Self {
        Self {
            pending,
            authorized,
        }
    }

    /// Apply one operation, best-effort
    pub fn run(&self, operation: MigrationOperation) -> MigrationReport {
        let report = match operation {
            MigrationOperation::Noop => MigrationReport::default(),
            MigrationOperation::WipePending => wipe(&self.pending),
            MigrationOperation::WipeAuthorized => wipe(&self.authorized),
            MigrationOperation::MovePendingToAuthorized => self.move_pending(),
        };

        if report.failed > 0 {
            warn!(
                "Migration {:?} finished with {} failures ({} moved, {} deleted)",
                operation, report.failed, report.moved, report.deleted
            );
        } else if operation != MigrationOperation::Noop {
            info!(
                "Migration {:?} done ({} moved, {} deleted)",
                operation, report.moved, report.deleted
            );
        }
        report
    }

    fn move_pending(&self) -> MigrationReport {
        let _entered = self.pending.span().enter();
        let mut report = MigrationReport::default();

        for path in self.pending.get_all_files() {
            match self.move_file(&path) {
                Ok(()) => report.moved += 1,
                Err(e) if e.is_not_found() => {
                    debug!("Batch {:?} vanished before migration", path);
                }
                Err(e) => {
                    // Stays in pending until the next transition or a wipe
                    error!("Failed to migrate {:?}: {}", path, e);
                    report.failed += 1;
                }
            }
        }
        report
    }

    fn move_file(&self, source: &Path) -> Result<()> {
        let created_ms = source
            .file_name()
            .and_then(|n| parse_batch_name(&n.to_string_lossy()))
            .ok_or_else(|| {
                PipelineError::MigrationFailed(format!("{:?} is not a batch file", source))
            })?;

        // Held across the rename so no writer appends halfway through
        let lock = FileLock::acquire_with_timeout(source, false, MIGRATION_LOCK_TIMEOUT)?;

        let target = self.authorized.reserve_path(created_ms).ok_or_else(|| {
            PipelineError::MigrationFailed("authorized store is not writable".to_string())
        })?;

        if let Err(e) = fs::rename(source, &target) {
            drop(lock);
            self.authorized.delete_file(&target, RemovalReason::Invalid);
            return Err(PipelineError::Io(e));
        }
        drop(lock);

        self.pending.forget_file(source);
        debug!("Moved {:?} to {:?}", source, target);
        Ok(())
    }
}

fn wipe(orchestrator: &BatchFileOrchestrator) -> MigrationReport {
    let _entered = orchestrator.span().enter();
    let mut report = MigrationReport::default();

    for path in orchestrator.get_all_files() {
        if orchestrator.delete_file(&path, RemovalReason::Dropped) {
            report.deleted += 1;
        } else if path.exists() {
            report.failed += 1;
        }
    }
    report
}

struct MigrationJob {
    operation: MigrationOperation,
    done: Sender<MigrationReport>,
}

/// Serial background executor for migrations
pub struct MigrationWorker {
    sender: Option<Sender<MigrationJob>>,
    handle: Option<JoinHandle<()>>,
}

impl MigrationWorker {
    /// Start the worker thread
    pub fn spawn(migrator: Arc<ConsentMigrator>, name: &str) -> Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded::<MigrationJob>();

        let handle = std::thread::Builder::new()
            .name(format!("migration-{}", name))
            .spawn(move || {
                for job in receiver.iter() {
                    let report = migrator.run(job.operation);
                    // The submitter may not be waiting
                    let _ = job.done.send(report);
                }
                debug!("Migration worker stopped");
            })
            .map_err(|e| PipelineError::WorkerUnavailable(e.to_string()))?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    /// Queue an operation; the returned receiver yields its report
    pub fn submit(&self, operation: MigrationOperation) -> Result<Receiver<MigrationReport>> {
        let (done, report) = crossbeam_channel::bounded(1);
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| PipelineError::WorkerUnavailable("worker shut down".to_string()))?;

        sender
            .send(MigrationJob { operation, done })
            .map_err(|_| PipelineError::WorkerUnavailable("worker thread exited".to_string()))?;
        Ok(report)
    }
}

impl Drop for MigrationWorker {
    fn drop(&mut self) {
        // Closing the channel lets the thread drain queued jobs and exit
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Migration worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::config::FilePersistenceConfig;
    use crate::utils::time::FakeTimeProvider;
    use std::io::Write;
    use tempfile::tempdir;

    use crate::storage::consent::TrackingConsent::*;

    fn stores(root: &Path) -> (Arc<BatchFileOrchestrator>, Arc<BatchFileOrchestrator>) {
        let clock = Arc::new(FakeTimeProvider::default());
        let config = FilePersistenceConfig::default();
        (
            Arc::new(BatchFileOrchestrator::new(
                root.join("pending"),
                config.clone(),
                clock.clone(),
                "pending",
            )),
            Arc::new(BatchFileOrchestrator::new(
                root.join("authorized"),
                config,
                clock,
                "authorized",
            )),
        )
    }

    fn seed(orchestrator: &BatchFileOrchestrator, name: &str, data: &[u8]) {
        fs::create_dir_all(orchestrator.root_dir()).unwrap();
        let mut file = fs::File::create(orchestrator.root_dir().join(name)).unwrap();
        file.write_all(data).unwrap();
    }

    #[test]
    fn test_plan_table() {
        let retain = RevocationPolicy::Retain;
        assert_eq!(
            MigrationOperation::plan(None, Granted, retain),
            MigrationOperation::WipePending
        );
        assert_eq!(
            MigrationOperation::plan(Some(Pending), Granted, retain),
            MigrationOperation::MovePendingToAuthorized
        );
        assert_eq!(
            MigrationOperation::plan(Some(Pending), NotGranted, retain),
            MigrationOperation::WipePending
        );
        assert_eq!(
            MigrationOperation::plan(Some(Granted), Pending, retain),
            MigrationOperation::Noop
        );
        assert_eq!(
            MigrationOperation::plan(Some(Granted), NotGranted, retain),
            MigrationOperation::Noop
        );
        assert_eq!(
            MigrationOperation::plan(Some(Granted), NotGranted, RevocationPolicy::PurgeAuthorized),
            MigrationOperation::WipeAuthorized
        );
        assert_eq!(
            MigrationOperation::plan(Some(NotGranted), Granted, retain),
            MigrationOperation::Noop
        );
    }

    #[test]
    fn test_never_moves_authorized_to_pending() {
        for previous in [Pending, Granted, NotGranted] {
            for current in [Pending, Granted, NotGranted] {
                for policy in [RevocationPolicy::Retain, RevocationPolicy::PurgeAuthorized] {
                    let op = MigrationOperation::plan(Some(previous), current, policy);
                    if op == MigrationOperation::MovePendingToAuthorized {
                        assert_eq!((previous, current), (Pending, Granted));
                    }
                }
            }
        }
    }

    #[test]
    fn test_move_pending_to_authorized() {
        let dir = tempdir().unwrap();
        let (pending, authorized) = stores(dir.path());
        seed(&pending, "1000", b"a");
        seed(&pending, "2000", b"b");
        let migrator = ConsentMigrator::new(pending.clone(), authorized.clone());

        let report = migrator.run(MigrationOperation::MovePendingToAuthorized);

        assert_eq!(report.moved, 2);
        assert!(pending.get_all_files().is_empty());
        let moved = authorized.get_all_files();
        assert_eq!(moved.len(), 2);
        assert_eq!(fs::read(&moved[0]).unwrap(), b"a");
        assert_eq!(fs::read(&moved[1]).unwrap(), b"b");
    }

    #[test]
    fn test_move_avoids_name_collision() {
        let dir = tempdir().unwrap();
        let (pending, authorized) = stores(dir.path());
        seed(&pending, "1000", b"from-pending");
        seed(&authorized, "1000", b"already-authorized");
        let migrator = ConsentMigrator::new(pending.clone(), authorized.clone());

        migrator.run(MigrationOperation::MovePendingToAuthorized);

        let files = authorized.get_all_files();
        assert_eq!(files.len(), 2);
        assert_eq!(fs::read(&files[0]).unwrap(), b"already-authorized");
        assert_eq!(fs::read(&files[1]).unwrap(), b"from-pending");
        assert!(files[1].ends_with("1001"));
    }

    #[test]
    fn test_wipe_pending_leaves_authorized() {
        let dir = tempdir().unwrap();
        let (pending, authorized) = stores(dir.path());
        seed(&pending, "1000", b"a");
        seed(&authorized, "1000", b"b");
        let migrator = ConsentMigrator::new(pending.clone(), authorized.clone());

        let report = migrator.run(MigrationOperation::WipePending);

        assert_eq!(report.deleted, 1);
        assert!(pending.get_all_files().is_empty());
        assert_eq!(authorized.get_all_files().len(), 1);
    }

    #[test]
    fn test_writer_waiting_on_moved_file_leaves_pending_empty() {
        use crate::storage::config::PayloadDecoration;
        use crate::storage::writer::BatchFileWriter;

        let dir = tempdir().unwrap();
        let (pending, authorized) = stores(dir.path());
        let writer = Arc::new(
            BatchFileWriter::new(pending.clone(), &PayloadDecoration::newline())
                .with_lock_timeout(Duration::from_secs(5)),
        );
        assert!(writer.write_bytes(b"first"));
        let source = pending.get_all_files().remove(0);
        let held = FileLock::try_acquire(&source, false).unwrap().unwrap();

        let waiting = {
            let writer = Arc::clone(&writer);
            std::thread::spawn(move || writer.write_bytes(b"second"))
        };
        std::thread::sleep(Duration::from_millis(100));
        drop(held);

        let migrator = ConsentMigrator::new(pending.clone(), authorized.clone());
        let report = migrator.run(MigrationOperation::MovePendingToAuthorized);
        let write_ok = waiting.join().unwrap();

        // Either the write landed before the move or it was reported as dropped
        assert_eq!(report.moved, 1);
        assert!(pending.get_all_files().is_empty());
        let moved = authorized.get_all_files();
        assert_eq!(moved.len(), 1);
        let expected: &[u8] = if write_ok { b"first\nsecond" } else { b"first" };
        assert_eq!(fs::read(&moved[0]).unwrap(), expected);
    }

    #[test]
    fn test_worker_runs_jobs_in_order() {
        let dir = tempdir().unwrap();
        let (pending, authorized) = stores(dir.path());
        seed(&pending, "1000", b"a");
        let migrator = Arc::new(ConsentMigrator::new(pending.clone(), authorized.clone()));
        let worker = MigrationWorker::spawn(migrator, "test").unwrap();

        let first = worker.submit(MigrationOperation::MovePendingToAuthorized).unwrap();
        let second = worker.submit(MigrationOperation::WipeAuthorized).unwrap();

        assert_eq!(first.recv().unwrap().moved, 1);
        assert_eq!(second.recv().unwrap().deleted, 1);
        assert!(authorized.get_all_files().is_empty());
    }
}
