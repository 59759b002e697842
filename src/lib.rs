// src/lib.rs
//! Durable event buffering and delivery
//!
//! Producers hand events to an `EventPipeline`, which appends them to batch
//! files on disk and uploads those files in the background with an adaptive
//! retry interval. Delivery is at-least-once and survives process restarts.
//!
//! # Architecture
//!
//! - **storage**: batch file orchestration, locked appends, batch reads,
//!   consent-gated pending/authorized stores
//! - **upload**: status classification, backoff, per-feature upload loop,
//!   shutdown flush, background job
//! - **event**: tagged event envelope and feature kinds
//! - **pipeline**: feature registry and routing
//! - **observability**: tracing and metrics setup
//! - **utils**: errors, configuration, time

pub mod event;
pub mod observability;
pub mod pipeline;
pub mod storage;
pub mod upload;
pub mod utils;

pub use event::{Event, FeatureKind};
pub use pipeline::{EventPipeline, PipelineDependencies};
pub use storage::consent::{ConsentProvider, TrackingConsent};
pub use upload::{DataUploader, UploadStatus};
pub use utils::config::PipelineConfig;
pub use utils::errors::{PipelineError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
