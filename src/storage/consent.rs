// src/storage/consent.rs
//! User tracking consent
//!
//! The provider is an explicit object handed to every storage; there is no
//! process-wide consent holder.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use tracing::info;

/// Tracking consent given by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingConsent {
    /// Not decided yet: buffer in the pending store
    Pending,
    /// Buffer in the authorized store and upload
    Granted,
    /// Discard new data
    NotGranted,
}

/// Receives consent transitions
pub trait ConsentListener: Send + Sync {
    fn on_consent_updated(&self, previous: TrackingConsent, current: TrackingConsent);
}

/// Holder of the current consent and its listeners
pub struct ConsentProvider {
    consent: RwLock<TrackingConsent>,
    listeners: RwLock<Vec<Weak<dyn ConsentListener>>>,
}

impl ConsentProvider {
    pub fn new(initial: TrackingConsent) -> Self {
        Self {
            consent: RwLock::new(initial),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn consent(&self) -> TrackingConsent {
        *self.consent.read()
    }

    /// Change the consent and notify listeners when it actually changed
    pub fn set_consent(&self, consent: TrackingConsent) {
        let previous = {
            let mut current = self.consent.write();
            std::mem::replace(&mut *current, consent)
        };

        if previous == consent {
            return;
        }
        info!("Tracking consent changed from {:?} to {:?}", previous, consent);

        // Notify outside the lock so listeners may read the provider
        let listeners: Vec<Arc<dyn ConsentListener>> =
            self.listeners.read().iter().filter_map(Weak::upgrade).collect();
        for listener in listeners {
            listener.on_consent_updated(previous, consent);
        }
    }

    /// Register a listener; it is dropped from the list once deallocated
    pub fn register(&self, listener: &Arc<dyn ConsentListener>) {
        let mut listeners = self.listeners.write();
        listeners.retain(|l| l.strong_count() > 0);
        listeners.push(Arc::downgrade(listener));
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .iter()
            .filter(|l| l.strong_count() > 0)
            .count()
    }
}

impl Default for ConsentProvider {
    fn default() -> Self {
        Self::new(TrackingConsent::Pending)
    }
}
