//! Error types for the event client

use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RavenError>;

#[derive(Debug, Error)]
pub enum RavenError {
    /// Malformed DSN or invalid client configuration
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// The entropy source could not supply an event id
    #[error("Failed to generate event id: {0}")]
    IdGeneration(String),

    /// Event timestamp does not match `YYYY-MM-DDTHH:MM:SS`
    #[error("Invalid event timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Compression or text encoding stream failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Collector answered with a status other than 200 or 301
    #[error("Unexpected response status: {0}")]
    Status(StatusCode),

    #[error("Too many redirects (limit {0})")]
    TooManyRedirects(usize),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(String),
}

impl RavenError {
    /// Whether the error happened while talking to the collector
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RavenError::Http(_)
                | RavenError::Timeout(_)
                | RavenError::Status(_)
                | RavenError::TooManyRedirects(_)
                | RavenError::Transport(_)
        )
    }
}
