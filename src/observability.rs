// src/observability.rs
//! Tracing and metrics setup
//!
//! The library only emits through the `tracing` and `metrics` facades.
//! Installing a subscriber or a recorder is left to the host binary.

use crate::utils::errors::{PipelineError, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter
pub const LOG_ENV_VAR: &str = "EVENT_PIPELINE_LOG";

/// A batch file stopped receiving writes
pub const BATCH_CLOSED: &str = "pipeline_batch_closed_total";
/// A batch file was deleted (label `reason`)
pub const BATCH_DELETED: &str = "pipeline_batch_deleted_total";
/// A write was dropped before reaching disk (label `cause`)
pub const WRITE_DROPPED: &str = "pipeline_write_dropped_total";
/// An upload attempt finished (label `status`)
pub const UPLOAD_ATTEMPTS: &str = "pipeline_upload_total";
/// Files currently held by a store
pub const PENDING_BATCHES: &str = "pipeline_pending_batches";

/// Install the global tracing subscriber
pub fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| PipelineError::ConfigError(format!("tracing init failed: {}", e)))
}

/// Install the Prometheus recorder and return a handle for rendering
pub fn init_metrics() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| PipelineError::ConfigError(format!("metrics init failed: {}", e)))
}
