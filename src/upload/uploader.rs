// src/upload/uploader.rs
//! Transport seam

use crate::storage::reader::Batch;
use crate::upload::status::UploadStatus;

/// Sends one framed batch to the collector
///
/// Implementations own the wire format, authentication and their own
/// timeout. The call is blocking and runs on a dedicated worker thread, so
/// it must return in bounded time.
pub trait DataUploader: Send + Sync {
    fn upload(&self, batch: &Batch) -> UploadStatus;
}

impl<F> DataUploader for F
where
    F: Fn(&Batch) -> UploadStatus + Send + Sync,
{
    fn upload(&self, batch: &Batch) -> UploadStatus {
        self(batch)
    }
}
