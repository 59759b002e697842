// src/upload/mod.rs
//! Batch delivery: status classification, backoff, the per-feature loop,
//! the shutdown flush and the background job

pub mod backoff;
pub mod background;
pub mod flusher;
pub mod providers;
pub mod scheduler;
pub mod status;
pub mod uploader;

pub use backoff::BackoffState;
pub use background::{BackgroundUploadJob, BackgroundUploadTrigger, NoopBackgroundTrigger};
pub use flusher::DataFlusher;
pub use providers::{AlwaysReady, NetworkInfoProvider, SystemInfo, SystemInfoProvider};
pub use scheduler::{TickOutcome, UploadRunner, UploadScheduler};
pub use status::UploadStatus;
pub use uploader::DataUploader;
