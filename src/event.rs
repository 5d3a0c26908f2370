//! Event data structures and default filling

use crate::errors::{RavenError, Result};
use chrono::{NaiveDateTime, Utc};
use rand::TryRngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use uuid::Builder;

/// ISO 8601 without a timezone offset, always UTC
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub const DEFAULT_LEVEL: &str = "error";
pub const DEFAULT_LOGGER: &str = "root";

/// One call-stack entry
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Frame {
    pub filename: String,
    pub abs_path: String,
    pub lineno: u32,
    pub function: String,
    pub module: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stacktrace {
    pub frames: Vec<Frame>,
}

impl Stacktrace {
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }
}

/// A single message reported to the collector.
///
/// Empty fields are filled by [`Event::fill_defaults`] when the event is
/// captured; `project` is always replaced by the client's project id.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub event_id: String,
    pub project: String,
    pub message: String,
    pub timestamp: String,
    pub level: String,
    pub logger: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub culprit: Option<String>,
    #[serde(default)]
    pub stacktrace: Stacktrace,
}

impl Event {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = event_id.into();
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_logger(mut self, logger: impl Into<String>) -> Self {
        self.logger = logger.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    pub fn with_culprit(mut self, culprit: impl Into<String>) -> Self {
        self.culprit = Some(culprit.into());
        self
    }

    pub fn with_stacktrace(mut self, stacktrace: Stacktrace) -> Self {
        self.stacktrace = stacktrace;
        self
    }

    /// Fill unset fields and stamp the project id.
    ///
    /// The stack trace is left alone; the client captures one separately
    /// when the caller supplied none.
    pub fn fill_defaults(&mut self, project: &str) -> Result<()> {
        self.project = project.to_string();

        if self.event_id.is_empty() {
            self.event_id = generate_event_id()?;
        }
        if self.level.is_empty() {
            self.level = DEFAULT_LEVEL.to_string();
        }
        if self.logger.is_empty() {
            self.logger = DEFAULT_LOGGER.to_string();
        }
        if self.timestamp.is_empty() {
            self.timestamp = current_timestamp();
        }

        Ok(())
    }

    /// Seconds since the Unix epoch for `timestamp`
    pub fn unix_timestamp(&self) -> Result<i64> {
        let parsed = NaiveDateTime::parse_from_str(&self.timestamp, TIMESTAMP_FORMAT)?;
        Ok(parsed.and_utc().timestamp())
    }
}

/// Generate a random 32 character hex event id.
///
/// The version and variant bits are set as for a random (v4) UUID. Fails if
/// the operating system cannot provide entropy.
pub fn generate_event_id() -> Result<String> {
    let mut bytes = [0u8; 16];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| RavenError::IdGeneration(e.to_string()))?;

    Ok(Builder::from_random_bytes(bytes)
        .into_uuid()
        .simple()
        .to_string())
}

/// Current UTC time in [`TIMESTAMP_FORMAT`]
pub fn current_timestamp() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}
