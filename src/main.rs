// src/main.rs
//! Event pipeline demo
//!
//! Buffers synthetic logs and RUM events on disk and "uploads" them to a
//! transport that only logs what it receives, until Ctrl+C. Pass a config
//! file path as the first argument to override the defaults.

use anyhow::{Context, Result};
use chrono::Utc;
use event_pipeline::event::{Event, LogEvent, LogLevel, RumEvent, RumEventKind};
use event_pipeline::observability::{init_metrics, init_tracing};
use event_pipeline::storage::consent::{ConsentProvider, TrackingConsent};
use event_pipeline::storage::reader::Batch;
use event_pipeline::upload::{DataUploader, UploadStatus};
use event_pipeline::utils::config::PipelineConfig;
use event_pipeline::{EventPipeline, PipelineDependencies};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Accepts everything, logging the batch size
struct LoggingUploader;

impl DataUploader for LoggingUploader {
    fn upload(&self, batch: &Batch) -> UploadStatus {
        info!("Uploading batch {} ({} bytes)", batch.id, batch.payload.len());
        UploadStatus::from_http_code(202)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing(false).context("failed to initialize tracing")?;
    let metrics = init_metrics().context("failed to initialize metrics")?;

    info!("Starting event pipeline demo v{}", event_pipeline::VERSION);

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config =
        PipelineConfig::load(config_path.as_deref()).context("failed to load configuration")?;
    info!("Configuration loaded: {:?}", config);

    let consent = Arc::new(ConsentProvider::new(TrackingConsent::Pending));
    let deps = PipelineDependencies::new(Arc::new(LoggingUploader)).with_consent(consent.clone());
    let pipeline = Arc::new(EventPipeline::new(config, deps).context("failed to build pipeline")?);
    pipeline.start()?;

    let producer = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(200));
            let session_id = ulid::Ulid::new().to_string();
            for i in 0u64.. {
                interval.tick().await;
                let log = LogEvent::new(LogLevel::Info, format!("tick {}", i))
                    .with_attribute("iteration", serde_json::json!(i));
                pipeline.send(&Event::Log(log));
                pipeline.send(&Event::Rum(RumEvent {
                    id: ulid::Ulid::new().to_string(),
                    session_id: session_id.clone(),
                    timestamp: Utc::now(),
                    kind: RumEventKind::Action,
                    payload: serde_json::json!({ "iteration": i }),
                }));
            }
        })
    };

    // Events produced before this point stay in the pending store and move
    // over once consent is granted
    tokio::time::sleep(Duration::from_secs(2)).await;
    consent.set_consent(TrackingConsent::Granted);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("Received shutdown signal, cleaning up...");

    producer.abort();
    pipeline.stop().await;

    let flushing = Arc::clone(&pipeline);
    match tokio::task::spawn_blocking(move || flushing.flush()).await {
        Ok(sent) => info!("Flushed {} batches on shutdown", sent),
        Err(e) => warn!("Shutdown flush failed: {}", e),
    }

    println!("{}", metrics.render());
    Ok(())
}
