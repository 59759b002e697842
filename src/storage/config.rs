// src/storage/config.rs
//! Persistence limits and payload framing

use serde::{Deserialize, Serialize};

/// Limits applied to the batch files of one store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilePersistenceConfig {
    /// Maximum size of a single batch file
    pub max_batch_size_bytes: u64,

    /// Maximum number of items appended to one file
    pub max_items_per_batch: u64,

    /// Window after the last write during which a file is still "recent":
    /// reusable for writing, not yet eligible for reading
    pub recent_delay_ms: u64,

    /// Files created longer ago than this are never appended to and get purged
    pub old_file_threshold_ms: u64,

    /// Upper bound on the total bytes held by one store
    pub max_disk_space_bytes: u64,

    /// Minimum time between two eviction/purge sweeps on the write path
    pub cleanup_frequency_ms: u64,

    /// Largest single item accepted by the writer
    pub max_item_size_bytes: u64,
}

impl Default for FilePersistenceConfig {
    fn default() -> Self {
        Self {
            max_batch_size_bytes: 4 * 1024 * 1024,
            max_items_per_batch: 500,
            recent_delay_ms: 5_000,
            old_file_threshold_ms: 18 * 60 * 60 * 1000,
            max_disk_space_bytes: 128 * 1024 * 1024,
            cleanup_frequency_ms: 1_000,
            max_item_size_bytes: 512 * 1024,
        }
    }
}

impl FilePersistenceConfig {
    /// Check the limits are usable
    pub fn validate(&self) -> Result<(), String> {
        if self.max_batch_size_bytes == 0 {
            return Err("max_batch_size_bytes cannot be 0".to_string());
        }
        if self.max_items_per_batch == 0 {
            return Err("max_items_per_batch cannot be 0".to_string());
        }
        if self.max_disk_space_bytes < self.max_batch_size_bytes {
            return Err(format!(
                "max_disk_space_bytes ({}) cannot be lower than max_batch_size_bytes ({})",
                self.max_disk_space_bytes, self.max_batch_size_bytes
            ));
        }
        if self.old_file_threshold_ms <= self.recent_delay_ms {
            return Err("old_file_threshold_ms must exceed recent_delay_ms".to_string());
        }
        Ok(())
    }

    /// Largest item the writer will try to persist
    pub fn item_size_limit(&self) -> u64 {
        self.max_item_size_bytes.min(self.max_batch_size_bytes)
    }
}

/// Framing applied around the items of one batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadDecoration {
    pub prefix: Vec<u8>,
    pub suffix: Vec<u8>,
    pub separator: Vec<u8>,
}

impl PayloadDecoration {
    pub fn new(prefix: &[u8], suffix: &[u8], separator: &[u8]) -> Self {
        Self {
            prefix: prefix.to_vec(),
            suffix: suffix.to_vec(),
            separator: separator.to_vec(),
        }
    }

    /// `[item1,item2,...]`
    pub fn json_array() -> Self {
        Self::new(b"[", b"]", b",")
    }

    /// One item per line
    pub fn newline() -> Self {
        Self::new(b"", b"", b"\n")
    }

    /// Wrap raw file content into a transmittable payload
    pub fn frame(&self, content: &[u8]) -> Vec<u8> {
        let mut payload =
            Vec::with_capacity(self.prefix.len() + content.len() + self.suffix.len());
        payload.extend_from_slice(&self.prefix);
        payload.extend_from_slice(content);
        payload.extend_from_slice(&self.suffix);
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(FilePersistenceConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_configs() {
        let config = FilePersistenceConfig {
            max_items_per_batch: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = FilePersistenceConfig {
            max_disk_space_bytes: 10,
            max_batch_size_bytes: 100,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_item_size_limit() {
        let config = FilePersistenceConfig {
            max_batch_size_bytes: 100,
            max_item_size_bytes: 1000,
            ..Default::default()
        };
        assert_eq!(config.item_size_limit(), 100);
    }

    #[test]
    fn test_frame() {
        let content = br#"{"a":1},{"b":2}"#;
        let payload = PayloadDecoration::json_array().frame(content);
        assert_eq!(payload, br#"[{"a":1},{"b":2}]"#.to_vec());

        let payload = PayloadDecoration::newline().frame(b"x\ny");
        assert_eq!(payload, b"x\ny".to_vec());
    }
}
