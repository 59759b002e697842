// src/event.rs
//! Event envelope routed through the pipeline
//!
//! Every producer emits an `Event`; the variant decides which feature store
//! receives it. Payload schemas are kept deliberately small; the pipeline
//! only cares about the serialized bytes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::storage::config::PayloadDecoration;

/// Feature owning a pair of stores and an upload loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Logs,
    Traces,
    Rum,
    SessionReplay,
}

impl FeatureKind {
    pub const ALL: [FeatureKind; 4] = [
        FeatureKind::Logs,
        FeatureKind::Traces,
        FeatureKind::Rum,
        FeatureKind::SessionReplay,
    ];

    /// Directory name used under the pipeline root
    pub fn dir_name(&self) -> &'static str {
        match self {
            FeatureKind::Logs => "logs",
            FeatureKind::Traces => "traces",
            FeatureKind::Rum => "rum",
            FeatureKind::SessionReplay => "session-replay",
        }
    }

    /// Framing the intake expects for this feature
    pub fn decoration(&self) -> PayloadDecoration {
        match self {
            FeatureKind::Logs => PayloadDecoration::json_array(),
            FeatureKind::Traces | FeatureKind::Rum | FeatureKind::SessionReplay => {
                PayloadDecoration::newline()
            }
        }
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Tagged event envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Log(LogEvent),
    Span(SpanEvent),
    Rum(RumEvent),
    ReplaySegment(ReplaySegment),
}

impl Event {
    /// Feature whose storage receives this event
    pub fn feature(&self) -> FeatureKind {
        match self {
            Event::Log(_) => FeatureKind::Logs,
            Event::Span(_) => FeatureKind::Traces,
            Event::Rum(_) => FeatureKind::Rum,
            Event::ReplaySegment(_) => FeatureKind::SessionReplay,
        }
    }
}

/// Log severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl LogEvent {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            timestamp: Utc::now(),
            level,
            message: message.into(),
            attributes: serde_json::Map::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    pub trace_id: String,
    pub span_id: String,
    pub parent_id: Option<String>,
    pub name: String,
    pub resource: String,
    pub start: DateTime<Utc>,
    pub duration_ns: u64,
    pub error: bool,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub meta: serde_json::Map<String, serde_json::Value>,
}

/// RUM event categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RumEventKind {
    View,
    Action,
    Resource,
    Error,
    LongTask,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RumEvent {
    pub id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: RumEventKind,
    pub payload: serde_json::Value,
}

/// Session replay segment covering a time range of one view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplaySegment {
    pub session_id: String,
    pub view_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub records: Vec<serde_json::Value>,
}
