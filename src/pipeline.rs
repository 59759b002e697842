// src/pipeline.rs
//! Feature registry and event routing
//!
//! One `ConsentAwareStorage` and one `UploadScheduler` per enabled feature.
//! Collaborators (clock, consent, transport, preconditions, background
//! trigger) are passed in explicitly through `PipelineDependencies`.

use crate::event::{Event, FeatureKind};
use crate::storage::consent::{ConsentProvider, TrackingConsent};
use crate::storage::consent_aware::ConsentAwareStorage;
use crate::upload::background::{BackgroundUploadJob, BackgroundUploadTrigger, NoopBackgroundTrigger};
use crate::upload::flusher::DataFlusher;
use crate::upload::providers::{AlwaysReady, NetworkInfoProvider, SystemInfoProvider};
use crate::upload::scheduler::{UploadRunner, UploadScheduler};
use crate::upload::uploader::DataUploader;
use crate::utils::config::PipelineConfig;
use crate::utils::errors::Result;
use crate::utils::time::{SystemTimeProvider, TimeProvider};
use dashmap::DashMap;
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// External collaborators of the pipeline
#[derive(Clone)]
pub struct PipelineDependencies {
    pub clock: Arc<dyn TimeProvider>,
    pub consent: Arc<ConsentProvider>,
    pub uploader: Arc<dyn DataUploader>,
    pub feature_uploaders: HashMap<FeatureKind, Arc<dyn DataUploader>>,
    pub network: Arc<dyn NetworkInfoProvider>,
    pub system: Arc<dyn SystemInfoProvider>,
    pub background: Arc<dyn BackgroundUploadTrigger>,
}

impl PipelineDependencies {
    /// Wall clock, pending consent, no upload preconditions, no background job
    pub fn new(uploader: Arc<dyn DataUploader>) -> Self {
        Self {
            clock: Arc::new(SystemTimeProvider),
            consent: Arc::new(ConsentProvider::default()),
            uploader,
            feature_uploaders: HashMap::new(),
            network: Arc::new(AlwaysReady),
            system: Arc::new(AlwaysReady),
            background: Arc::new(NoopBackgroundTrigger),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn TimeProvider>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_consent(mut self, consent: Arc<ConsentProvider>) -> Self {
        self.consent = consent;
        self
    }

    /// Use a dedicated transport for one feature
    pub fn with_feature_uploader(
        mut self,
        feature: FeatureKind,
        uploader: Arc<dyn DataUploader>,
    ) -> Self {
        self.feature_uploaders.insert(feature, uploader);
        self
    }

    pub fn with_network(mut self, network: Arc<dyn NetworkInfoProvider>) -> Self {
        self.network = network;
        self
    }

    pub fn with_system_info(mut self, system: Arc<dyn SystemInfoProvider>) -> Self {
        self.system = system;
        self
    }

    pub fn with_background_trigger(mut self, trigger: Arc<dyn BackgroundUploadTrigger>) -> Self {
        self.background = trigger;
        self
    }

    fn uploader_for(&self, feature: FeatureKind) -> Arc<dyn DataUploader> {
        self.feature_uploaders
            .get(&feature)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.uploader))
    }
}

struct FeatureHandle {
    storage: Arc<ConsentAwareStorage>,
    uploader: Arc<dyn DataUploader>,
    scheduler: UploadScheduler,
}

/// Entry point for producers and the host lifecycle
pub struct EventPipeline {
    config: PipelineConfig,
    features: DashMap<FeatureKind, FeatureHandle>,
    consent: Arc<ConsentProvider>,
    network: Arc<dyn NetworkInfoProvider>,
    background: Arc<dyn BackgroundUploadTrigger>,
}

impl EventPipeline {
    /// Validate the configuration and build every enabled feature
    pub fn new(config: PipelineConfig, deps: PipelineDependencies) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.root_dir)?;
        info!("Initializing event pipeline in {:?}", config.root_dir);

        let features = DashMap::new();
        for &feature in &config.features {
            if features.contains_key(&feature) {
                continue;
            }
            let storage = ConsentAwareStorage::new(
                &config.root_dir,
                feature,
                config.persistence.clone(),
                Arc::clone(&deps.clock),
                Arc::clone(&deps.consent),
                config.revocation_policy,
            )?;
            let uploader = deps.uploader_for(feature);
            let runner = UploadRunner::new(
                Arc::clone(&storage),
                Arc::clone(&uploader),
                Arc::clone(&deps.network),
                Arc::clone(&deps.system),
                config.upload.clone(),
            );
            features.insert(
                feature,
                FeatureHandle {
                    storage,
                    uploader,
                    scheduler: UploadScheduler::new(Arc::new(runner)),
                },
            );
            debug!("Registered feature {}", feature);
        }

        Ok(Self {
            config,
            features,
            consent: deps.consent,
            network: deps.network,
            background: deps.background,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Registered features, sorted
    pub fn features(&self) -> Vec<FeatureKind> {
        let mut features: Vec<FeatureKind> = self.features.iter().map(|e| *e.key()).collect();
        features.sort();
        features
    }

    pub fn storage(&self, feature: FeatureKind) -> Option<Arc<ConsentAwareStorage>> {
        self.features.get(&feature).map(|h| Arc::clone(&h.storage))
    }

    pub fn consent(&self) -> TrackingConsent {
        self.consent.consent()
    }

    pub fn set_consent(&self, consent: TrackingConsent) {
        self.consent.set_consent(consent);
    }

    /// Persist an event in its feature's storage; returns whether it reached disk
    pub fn send(&self, event: &Event) -> bool {
        let feature = event.feature();
        let Some(storage) = self.storage(feature) else {
            warn!("Dropping {} event, feature not registered", feature);
            return false;
        };
        storage.write_event(event)
    }

    /// Start every upload loop on the current tokio runtime
    pub fn start(&self) -> Result<()> {
        for mut handle in self.features.iter_mut() {
            handle.scheduler.start()?;
        }
        Ok(())
    }

    /// Stop every upload loop; in-flight uploads finish first
    pub async fn stop(&self) {
        let loops: Vec<_> = self
            .features
            .iter_mut()
            .filter_map(|mut handle| handle.scheduler.cancel())
            .collect();

        for task in loops {
            if let Err(e) = task.await {
                error!("Upload loop ended abnormally: {}", e);
            }
        }
        info!("Event pipeline stopped");
    }

    /// Upload and delete everything authorized, recent files included
    ///
    /// Meant to run once after `stop`, right before the process exits.
    pub fn flush(&self) -> usize {
        self.handles()
            .into_iter()
            .map(|(storage, uploader)| DataFlusher::new(storage, uploader).flush())
            .sum()
    }

    /// Delete every buffered batch of every feature
    pub fn clear_all_data(&self) {
        for handle in self.features.iter() {
            handle.storage.drop_all_batches();
        }
        info!("Cleared all buffered data");
    }

    /// The host went to the background; ask for an OS job when offline
    pub fn on_background(&self, offline: bool) {
        if offline {
            debug!("Scheduling background upload");
            self.background.schedule();
        }
    }

    /// The host came back to the foreground
    pub fn on_foreground(&self) {
        self.background.cancel();
    }

    /// Job the host runs when its background trigger fires
    pub fn background_job(&self) -> BackgroundUploadJob {
        BackgroundUploadJob::new(self.handles(), Arc::clone(&self.network))
    }

    fn handles(&self) -> Vec<(Arc<ConsentAwareStorage>, Arc<dyn DataUploader>)> {
        let mut handles: Vec<_> = self
            .features
            .iter()
            .map(|h| (Arc::clone(&h.storage), Arc::clone(&h.uploader)))
            .collect();
        handles.sort_by_key(|(storage, _)| storage.feature());
        handles
    }
}
