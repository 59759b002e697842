// src/upload/scheduler.rs
//! Per-feature upload loop
//!
//! `UploadRunner::run_once` is one tick: check preconditions, pull up to
//! `max_batches_per_job` batches, upload each, then drop or release it
//! depending on the status. `UploadScheduler` drives ticks on the tokio
//! runtime, sleeping for the current backoff interval in between. The
//! blocking upload call itself runs on the blocking pool.

use crate::observability::UPLOAD_ATTEMPTS;
use crate::storage::consent_aware::ConsentAwareStorage;
use crate::storage::reader::Batch;
use crate::upload::backoff::BackoffState;
use crate::upload::providers::{NetworkInfoProvider, SystemInfoProvider};
use crate::upload::status::UploadStatus;
use crate::upload::uploader::DataUploader;
use crate::utils::config::UploadConfig;
use crate::utils::errors::{PipelineError, Result};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

/// Why a tick did not try to upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NetworkUnavailable,
    SystemNotReady,
}

/// What one tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Skipped(SkipReason),
    NoBatch,
    Uploaded { count: usize, last: UploadStatus },
}

/// Counters kept by a runner
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadStats {
    pub ticks: u64,
    pub skipped: u64,
    pub batches_dropped: u64,
    pub batches_released: u64,
}

/// Call the uploader once and count the attempt; a panicking uploader
/// counts as a network error
pub(crate) fn attempt_upload(
    storage: &ConsentAwareStorage,
    uploader: &dyn DataUploader,
    batch: &Batch,
) -> UploadStatus {
    let status = match catch_unwind(AssertUnwindSafe(|| uploader.upload(batch))) {
        Ok(status) => status,
        Err(_) => {
            error!("Uploader panicked on batch {}", batch.id);
            UploadStatus::NetworkError
        }
    };

    metrics::counter!(
        UPLOAD_ATTEMPTS,
        "feature" => storage.feature().dir_name(),
        "status" => status.as_str()
    )
    .increment(1);
    status
}

/// Upload one batch, then drop it on success or terminal failure and
/// release it on a retryable one
pub(crate) fn upload_and_settle(
    storage: &ConsentAwareStorage,
    uploader: &dyn DataUploader,
    batch: &Batch,
) -> UploadStatus {
    let status = attempt_upload(storage, uploader, batch);

    if status.should_retry() {
        debug!("Batch {} failed with {}, keeping it", batch.id, status);
        storage.release_batch(&batch.id);
    } else {
        if status != UploadStatus::Success {
            warn!("Batch {} rejected with {}, dropping it", batch.id, status);
        } else {
            debug!("Batch {} uploaded ({} bytes)", batch.id, batch.payload.len());
        }
        storage.drop_batch(&batch.id);
    }
    status
}

/// One feature's upload tick and its backoff
pub struct UploadRunner {
    storage: Arc<ConsentAwareStorage>,
    uploader: Arc<dyn DataUploader>,
    network: Arc<dyn NetworkInfoProvider>,
    system: Arc<dyn SystemInfoProvider>,
    config: UploadConfig,
    backoff: Mutex<BackoffState>,
    stats: Mutex<UploadStats>,
}

impl UploadRunner {
    pub fn new(
        storage: Arc<ConsentAwareStorage>,
        uploader: Arc<dyn DataUploader>,
        network: Arc<dyn NetworkInfoProvider>,
        system: Arc<dyn SystemInfoProvider>,
        config: UploadConfig,
    ) -> Self {
        Self {
            backoff: Mutex::new(BackoffState::new(&config)),
            stats: Mutex::new(UploadStats::default()),
            storage,
            uploader,
            network,
            system,
            config,
        }
    }

    pub fn storage(&self) -> &Arc<ConsentAwareStorage> {
        &self.storage
    }

    /// Interval before the next tick
    pub fn current_delay(&self) -> Duration {
        self.backoff.lock().current()
    }

    pub fn stats(&self) -> UploadStats {
        self.stats.lock().clone()
    }

    /// Run one tick and adjust the interval from its outcome
    pub fn run_once(&self) -> TickOutcome {
        let _entered = self.storage.span().enter();
        let outcome = self.tick();

        let mut backoff = self.backoff.lock();
        match outcome {
            TickOutcome::Uploaded { last, .. } if !last.should_retry() => backoff.decrease(),
            _ => backoff.increase(),
        }
        debug!("Tick {:?}, next in {:?}", outcome, backoff.current());

        let mut stats = self.stats.lock();
        stats.ticks += 1;
        if let TickOutcome::Skipped(_) = outcome {
            stats.skipped += 1;
        }
        outcome
    }

    fn tick(&self) -> TickOutcome {
        if !self.network.is_network_available() {
            debug!("Skipping upload, network unavailable");
            return TickOutcome::Skipped(SkipReason::NetworkUnavailable);
        }
        if !self.system.is_system_ready(self.config.low_battery_threshold) {
            debug!("Skipping upload, system not ready");
            return TickOutcome::Skipped(SkipReason::SystemNotReady);
        }

        let mut count = 0;
        let mut last = None;
        while count < self.config.max_batches_per_job {
            let Some(batch) = self.storage.read_next_batch() else {
                break;
            };

            let status = upload_and_settle(&self.storage, self.uploader.as_ref(), &batch);
            count += 1;
            last = Some(status);

            let mut stats = self.stats.lock();
            if status.should_retry() {
                stats.batches_released += 1;
                break;
            }
            stats.batches_dropped += 1;
        }

        match last {
            Some(last) => TickOutcome::Uploaded { count, last },
            None => TickOutcome::NoBatch,
        }
    }
}

/// Timer-driven loop around an `UploadRunner`
pub struct UploadScheduler {
    runner: Arc<UploadRunner>,
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

impl UploadScheduler {
    pub fn new(runner: Arc<UploadRunner>) -> Self {
        Self {
            runner,
            cancel: None,
            handle: None,
        }
    }

    pub fn runner(&self) -> &Arc<UploadRunner> {
        &self.runner
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Spawn the loop on the current tokio runtime; no-op when running
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| PipelineError::WorkerUnavailable(e.to_string()))?;

        let feature = self.runner.storage().feature();
        info!("Starting upload loop for {}", feature);

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let runner = Arc::clone(&self.runner);
        let span = runner.storage().span().clone();

        let handle = runtime.spawn(
            async move {
                loop {
                    let delay = runner.current_delay();
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }

                    // Not raced against cancellation: an upload in flight runs
                    // to completion and settles its batch
                    let tick_runner = Arc::clone(&runner);
                    if let Err(e) = tokio::task::spawn_blocking(move || tick_runner.run_once()).await
                    {
                        error!("Upload tick failed: {}", e);
                    }
                }
                debug!("Upload loop stopped");
            }
            .instrument(span),
        );

        self.cancel = Some(cancel);
        self.handle = Some(handle);
        Ok(())
    }

    /// Cancel the next scheduled tick without waiting; returns the loop task
    pub fn cancel(&mut self) -> Option<JoinHandle<()>> {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        self.handle.take()
    }

    /// Cancel the next scheduled tick and wait for the current one
    pub async fn stop(&mut self) {
        if let Some(handle) = self.cancel() {
            if let Err(e) = handle.await {
                error!("Upload loop ended abnormally: {}", e);
            }
            info!("Stopped upload loop for {}", self.runner.storage().feature());
        }
    }
}

impl Drop for UploadScheduler {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}
