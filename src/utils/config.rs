// src/utils/config.rs
//! Pipeline configuration
//!
//! Values are layered: built-in defaults, then an optional file in any
//! format the `config` crate understands, then `EVENT_PIPELINE__*`
//! environment variables (`__` separates nested keys, e.g.
//! `EVENT_PIPELINE__UPLOAD__MIN_DELAY_MS=500`).

use crate::event::FeatureKind;
use crate::storage::config::FilePersistenceConfig;
use crate::storage::migrator::RevocationPolicy;
use crate::utils::errors::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "EVENT_PIPELINE";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding one sub-directory per feature
    pub root_dir: PathBuf,

    /// Limits shared by every store
    pub persistence: FilePersistenceConfig,

    /// Upload loop tuning
    pub upload: UploadConfig,

    /// Features to register
    pub features: Vec<FeatureKind>,

    /// Fate of authorized data when consent is revoked
    pub revocation_policy: RevocationPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            root_dir: std::env::temp_dir().join("event-pipeline"),
            persistence: FilePersistenceConfig::default(),
            upload: UploadConfig::default(),
            features: FeatureKind::ALL.to_vec(),
            revocation_policy: RevocationPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Load defaults, then `path` if given, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder()
            .add_source(::config::Config::try_from(&PipelineConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let loaded: PipelineConfig = builder.build()?.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        self.persistence
            .validate()
            .map_err(PipelineError::ConfigError)?;
        self.upload.validate().map_err(PipelineError::ConfigError)?;

        if self.features.is_empty() {
            return Err(PipelineError::ConfigError(
                "at least one feature must be enabled".to_string(),
            ));
        }
        Ok(())
    }
}

/// Upload scheduling and backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Interval the loop starts with
    pub default_delay_ms: u64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Multiplier applied after a tick that ended with a dropped batch
    pub decrease_percent: f64,
    /// Multiplier applied after a retryable failure or an idle tick
    pub increase_percent: f64,
    /// Batches uploaded back to back within one tick
    pub max_batches_per_job: usize,
    /// Battery percentage at or below which uploads pause unless charging
    pub low_battery_threshold: u8,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            default_delay_ms: 5_000,
            min_delay_ms: 1_000,
            max_delay_ms: 20_000,
            decrease_percent: 0.9,
            increase_percent: 1.1,
            max_batches_per_job: 7,
            low_battery_threshold: 10,
        }
    }
}

impl UploadConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.min_delay_ms == 0 {
            return Err("min_delay_ms cannot be 0".to_string());
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(format!(
                "min_delay_ms ({}) cannot exceed max_delay_ms ({})",
                self.min_delay_ms, self.max_delay_ms
            ));
        }
        if !(0.0..1.0).contains(&self.decrease_percent) || self.decrease_percent == 0.0 {
            return Err("decrease_percent must be within (0, 1)".to_string());
        }
        if self.increase_percent <= 1.0 {
            return Err("increase_percent must be above 1".to_string());
        }
        if self.max_batches_per_job == 0 {
            return Err("max_batches_per_job cannot be 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.upload.max_delay_ms, 4 * config.upload.default_delay_ms);
        assert_eq!(config.features.len(), 4);
    }

    #[test]
    fn test_rejects_inverted_delays() {
        let mut config = PipelineConfig::default();
        config.upload.min_delay_ms = 30_000;
        assert!(matches!(config.validate(), Err(PipelineError::ConfigError(_))));
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        let mut config = PipelineConfig::default();
        config.persistence.max_batch_size_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
root_dir = "/var/lib/pipeline"
features = ["logs", "rum"]
revocation_policy = "purge_authorized"

[persistence]
max_items_per_batch = 32

[upload]
min_delay_ms = 500
"#
        )
        .unwrap();

        let config = PipelineConfig::load(Some(&path)).unwrap();

        assert_eq!(config.root_dir, PathBuf::from("/var/lib/pipeline"));
        assert_eq!(config.features, vec![FeatureKind::Logs, FeatureKind::Rum]);
        assert_eq!(config.revocation_policy, RevocationPolicy::PurgeAuthorized);
        assert_eq!(config.persistence.max_items_per_batch, 32);
        assert_eq!(
            config.persistence.max_batch_size_bytes,
            FilePersistenceConfig::default().max_batch_size_bytes
        );
        assert_eq!(config.upload.min_delay_ms, 500);
        assert_eq!(config.upload.max_delay_ms, 20_000);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = PipelineConfig::load(Some(Path::new("/nonexistent/pipeline.toml")));
        assert!(matches!(result, Err(PipelineError::ConfigError(_))));
    }

    #[test]
    fn test_environment_overrides() {
        std::env::set_var("EVENT_PIPELINE__UPLOAD__MAX_BATCHES_PER_JOB", "3");
        let config = PipelineConfig::load(None);
        std::env::remove_var("EVENT_PIPELINE__UPLOAD__MAX_BATCHES_PER_JOB");

        assert_eq!(config.unwrap().upload.max_batches_per_job, 3);
    }
}
