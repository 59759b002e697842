// src/storage/mod.rs
//! Disk-backed batch storage
//!
//! One `BatchFileOrchestrator` per store decides file rotation and eviction,
//! `BatchFileWriter` appends under a per-file advisory lock and
//! `BatchFileReader` hands out framed batches. `ConsentAwareStorage` pairs a
//! pending and an authorized store per feature.

pub mod config;
pub mod consent;
pub mod consent_aware;
pub mod file_lock;
pub mod migrator;
pub mod orchestrator;
pub mod reader;
pub mod writer;

pub use config::{FilePersistenceConfig, PayloadDecoration};
pub use consent::{ConsentListener, ConsentProvider, TrackingConsent};
pub use consent_aware::ConsentAwareStorage;
pub use migrator::{ConsentMigrator, MigrationOperation, RevocationPolicy};
pub use orchestrator::{BatchFileOrchestrator, RemovalReason};
pub use reader::{Batch, BatchFileReader};
pub use writer::BatchFileWriter;
