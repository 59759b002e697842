// src/upload/flusher.rs
//! Last-chance drain before the process exits

use crate::storage::consent_aware::ConsentAwareStorage;
use crate::upload::scheduler::attempt_upload;
use crate::upload::uploader::DataUploader;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Uploads every authorized file once, recent ones included
///
/// Each file is dropped after its attempt whatever the outcome, so a flush
/// never leaves a file behind to be sent twice by the next process.
pub struct DataFlusher {
    storage: Arc<ConsentAwareStorage>,
    uploader: Arc<dyn DataUploader>,
}

impl DataFlusher {
    pub fn new(storage: Arc<ConsentAwareStorage>, uploader: Arc<dyn DataUploader>) -> Self {
        Self { storage, uploader }
    }

    /// Returns the number of batches sent
    pub fn flush(&self) -> usize {
        let _entered = self.storage.span().enter();
        let reader = self.storage.reader();
        let mut sent = 0;

        for path in self.storage.flushable_files() {
            let batch = match reader.read_file_framed(&path) {
                Ok(batch) => batch,
                Err(e) if e.is_not_found() => continue,
                Err(e) => {
                    warn!("Skipping unreadable batch {:?}: {}", path, e);
                    continue;
                }
            };

            let is_empty = batch.payload.len()
                <= reader.decoration().prefix.len() + reader.decoration().suffix.len();
            if !is_empty {
                let status = attempt_upload(&self.storage, self.uploader.as_ref(), &batch);
                debug!("Flushed batch {} with {}", batch.id, status);
                sent += 1;
            }
            self.storage.drop_batch(&batch.id);
        }

        info!("Flushed {} {} batches", sent, self.storage.feature());
        sent
    }
}
