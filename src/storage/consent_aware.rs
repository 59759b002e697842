// src/storage/consent_aware.rs
//! Pending and authorized stores of one feature
//!
//! Writes are routed by the current tracking consent: `Pending` buffers in
//! the pending store, `Granted` in the authorized store, `NotGranted`
//! discards. Only the authorized store is ever read for upload.

use crate::event::FeatureKind;
use crate::storage::config::FilePersistenceConfig;
use crate::storage::consent::{ConsentListener, ConsentProvider, TrackingConsent};
use crate::storage::migrator::{
    ConsentMigrator, MigrationOperation, MigrationWorker, RevocationPolicy,
};
use crate::storage::orchestrator::BatchFileOrchestrator;
use crate::storage::reader::{Batch, BatchFileReader};
use crate::storage::writer::{record_drop, BatchFileWriter, DropCause};
use crate::utils::errors::Result;
use crate::utils::time::TimeProvider;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info_span, trace, Span};

const PENDING_DIR: &str = "pending";
const AUTHORIZED_DIR: &str = "authorized";

/// Consent-gated storage for one feature
pub struct ConsentAwareStorage {
    feature: FeatureKind,
    consent: Arc<ConsentProvider>,
    policy: RevocationPolicy,
    pending_writer: BatchFileWriter,
    authorized_writer: BatchFileWriter,
    reader: BatchFileReader,
    migrator: Arc<ConsentMigrator>,
    worker: MigrationWorker,
    span: Span,
}

impl ConsentAwareStorage {
    /// Build the two stores under `<root>/<feature>/` and subscribe to consent
    ///
    /// Pending data left by a previous process is wiped before the storage
    /// accepts writes, since the consent it was collected under is unknown.
    pub fn new(
        root_dir: &Path,
        feature: FeatureKind,
        config: FilePersistenceConfig,
        clock: Arc<dyn TimeProvider>,
        consent: Arc<ConsentProvider>,
        policy: RevocationPolicy,
    ) -> Result<Arc<Self>> {
        let feature_dir = root_dir.join(feature.dir_name());
        let decoration = feature.decoration();

        let pending = Arc::new(BatchFileOrchestrator::new(
            feature_dir.join(PENDING_DIR),
            config.clone(),
            clock.clone(),
            format!("{}/{}", feature, PENDING_DIR),
        ));
        let authorized = Arc::new(BatchFileOrchestrator::new(
            feature_dir.join(AUTHORIZED_DIR),
            config,
            clock,
            format!("{}/{}", feature, AUTHORIZED_DIR),
        ));

        let migrator = Arc::new(ConsentMigrator::new(pending.clone(), authorized.clone()));
        let worker = MigrationWorker::spawn(migrator.clone(), &feature.to_string())?;

        let storage = Arc::new(Self {
            feature,
            pending_writer: BatchFileWriter::new(pending, &decoration),
            authorized_writer: BatchFileWriter::new(authorized.clone(), &decoration),
            reader: BatchFileReader::new(authorized, decoration),
            migrator,
            worker,
            policy,
            span: info_span!("feature", feature = %feature),
            consent: consent.clone(),
        });

        {
            let _entered = storage.span.enter();
            let initial = MigrationOperation::plan(None, consent.consent(), policy);
            storage.migrator.run(initial);
        }

        let listener: Arc<dyn ConsentListener> = storage.clone();
        consent.register(&listener);
        Ok(storage)
    }

    pub fn feature(&self) -> FeatureKind {
        self.feature
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn pending_store(&self) -> &Arc<BatchFileOrchestrator> {
        self.pending_writer.orchestrator()
    }

    pub fn authorized_store(&self) -> &Arc<BatchFileOrchestrator> {
        self.authorized_writer.orchestrator()
    }

    pub fn reader(&self) -> &BatchFileReader {
        &self.reader
    }

    /// Serialize and persist an event in the store the consent selects
    pub fn write_event<T: Serialize>(&self, event: &T) -> bool {
        match self.current_writer() {
            Some(writer) => writer.write_event(event),
            None => self.discard(),
        }
    }

    /// Persist a pre-serialized item in the store the consent selects
    pub fn write_bytes(&self, item: &[u8]) -> bool {
        match self.current_writer() {
            Some(writer) => writer.write_bytes(item),
            None => self.discard(),
        }
    }

    pub fn read_next_batch(&self) -> Option<Batch> {
        self.reader.read_next_batch()
    }

    pub fn release_batch(&self, id: &str) {
        self.reader.release_batch(id)
    }

    pub fn drop_batch(&self, id: &str) {
        self.reader.drop_batch(id)
    }

    /// Delete everything buffered for this feature, pending data included
    pub fn drop_all_batches(&self) {
        let _entered = self.span.enter();
        self.reader.drop_all_batches();
        self.migrator.run(MigrationOperation::WipePending);
    }

    /// Authorized files to upload on shutdown
    pub fn flushable_files(&self) -> Vec<PathBuf> {
        self.authorized_store().get_flushable_files()
    }

    /// Block until every migration queued so far has run
    pub fn wait_for_migrations(&self) {
        match self.worker.submit(MigrationOperation::Noop) {
            Ok(done) => {
                let _ = done.recv();
            }
            Err(e) => error!("Cannot wait for migrations: {}", e),
        }
    }

    fn current_writer(&self) -> Option<&BatchFileWriter> {
        match self.consent.consent() {
            TrackingConsent::Pending => Some(&self.pending_writer),
            TrackingConsent::Granted => Some(&self.authorized_writer),
            TrackingConsent::NotGranted => None,
        }
    }

    fn discard(&self) -> bool {
        trace!("Discarding {} item, consent not granted", self.feature);
        record_drop(&self.feature.to_string(), DropCause::Consent);
        false
    }
}

impl ConsentListener for ConsentAwareStorage {
    fn on_consent_updated(&self, previous: TrackingConsent, current: TrackingConsent) {
        let _entered = self.span.enter();
        let operation = MigrationOperation::plan(Some(previous), current, self.policy);
        debug!(
            "Consent {:?} -> {:?} requires {:?}",
            previous, current, operation
        );
        if operation == MigrationOperation::Noop {
            return;
        }

        if let Err(e) = self.worker.submit(operation) {
            error!("Failed to schedule {:?}: {}", operation, e);
        }
    }
}
