// src/upload/background.rs
//! Opportunistic upload while the host is in the background
//!
//! The host owns the actual OS job (`BackgroundUploadTrigger`); when it
//! fires, it calls `BackgroundUploadJob::run`. Nothing in the pipeline
//! depends on the job ever running.

use crate::storage::consent_aware::ConsentAwareStorage;
use crate::upload::providers::NetworkInfoProvider;
use crate::upload::scheduler::upload_and_settle;
use crate::upload::uploader::DataUploader;
use std::sync::Arc;
use tracing::{debug, info};

/// Host hook scheduling a best-effort background task
pub trait BackgroundUploadTrigger: Send + Sync {
    fn schedule(&self);
    fn cancel(&self);
}

/// Trigger for hosts without a background facility
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBackgroundTrigger;

impl BackgroundUploadTrigger for NoopBackgroundTrigger {
    fn schedule(&self) {}
    fn cancel(&self) {}
}

/// Drains eligible batches of every feature
pub struct BackgroundUploadJob {
    targets: Vec<(Arc<ConsentAwareStorage>, Arc<dyn DataUploader>)>,
    network: Arc<dyn NetworkInfoProvider>,
}

impl BackgroundUploadJob {
    pub fn new(
        targets: Vec<(Arc<ConsentAwareStorage>, Arc<dyn DataUploader>)>,
        network: Arc<dyn NetworkInfoProvider>,
    ) -> Self {
        Self { targets, network }
    }

    /// Upload until every store is empty or fails; returns whether work remains
    pub fn run(&self) -> bool {
        if !self.network.is_network_available() {
            debug!("Background upload skipped, network unavailable");
            return self.has_pending_work();
        }

        let mut sent = 0;
        for (storage, uploader) in &self.targets {
            let _entered = storage.span().enter();
            // Bounded by the files present now so an undeletable file
            // cannot keep the job spinning
            let budget = storage.authorized_store().get_all_files().len();
            for _ in 0..budget {
                let Some(batch) = storage.read_next_batch() else {
                    break;
                };
                let status = upload_and_settle(storage, uploader.as_ref(), &batch);
                if status.should_retry() {
                    break;
                }
                sent += 1;
            }
        }

        let remaining = self.has_pending_work();
        info!(
            "Background upload sent {} batches, work remaining: {}",
            sent, remaining
        );
        remaining
    }

    fn has_pending_work(&self) -> bool {
        self.targets
            .iter()
            .any(|(storage, _)| !storage.authorized_store().get_all_files().is_empty())
    }
}
