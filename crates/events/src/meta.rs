//! Metadata stamped on every event when it is emitted

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::Level;
use uuid::Uuid;

/// Package a compile-scoped event belongs to
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageScope {
    pub name: String,
    pub version: String,
}

impl PackageScope {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventMeta {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub level: EventLevel,
    pub source: EventSource,
    /// Set for everything emitted while a package compiles
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<PackageScope>,
}

impl EventMeta {
    #[must_use]
    pub fn new(level: EventLevel, source: EventSource) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            level,
            source,
            package: None,
        }
    }

    /// Key that stitches one compile's events together: the package name
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.package.as_ref().map(|package| package.name.as_str())
    }

    #[must_use]
    pub fn tracing_level(&self) -> Level {
        match self.level {
            EventLevel::Trace => Level::TRACE,
            EventLevel::Debug => Level::DEBUG,
            EventLevel::Info => Level::INFO,
            EventLevel::Warn => Level::WARN,
            EventLevel::Error => Level::ERROR,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<Level> for EventLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::TRACE => EventLevel::Trace,
            Level::DEBUG => EventLevel::Debug,
            Level::INFO => EventLevel::Info,
            Level::WARN => EventLevel::Warn,
            Level::ERROR => EventLevel::Error,
        }
    }
}

/// Event domain, used as the `source` field of log records
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    General,
    Compile,
    Platform,
}

impl EventSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Compile => "compile",
            Self::Platform => "platform",
        }
    }
}
