//! Configuration management for the event client

use crate::dsn::Dsn;
use crate::errors::{RavenError, Result};
use std::env;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

#[derive(Debug, Clone)]
pub struct Config {
    /// Where events are delivered and with which credentials
    pub dsn: Dsn,

    /// Bound on a whole delivery, redirects included
    pub timeout: Duration,

    /// Maximum number of 301 responses followed per delivery
    pub max_redirects: usize,
}

impl Config {
    /// Build a configuration from a DSN, honouring its `timeout` parameter
    pub fn from_dsn(dsn: Dsn) -> Self {
        Self {
            timeout: dsn.timeout().unwrap_or(DEFAULT_TIMEOUT),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            dsn,
        }
    }

    /// Parse a DSN string into a configuration
    pub fn parse(dsn: &str) -> Result<Self> {
        Ok(Self::from_dsn(Dsn::parse(dsn)?))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let dsn = env::var("RAVEN_DSN")
            .map_err(|_| RavenError::Config("RAVEN_DSN is not set".to_string()))?;
        let config = Config::parse(&dsn)?.with_env_overrides()?;

        config.validate()?;
        Ok(config)
    }

    /// Apply `RAVEN_TIMEOUT_SECONDS` and `RAVEN_MAX_REDIRECTS` when set
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(timeout) = lookup("RAVEN_TIMEOUT_SECONDS") {
            let seconds = timeout.parse::<u64>().map_err(|_| {
                RavenError::Config(format!("RAVEN_TIMEOUT_SECONDS is not an integer: {}", timeout))
            })?;
            self.timeout = Duration::from_secs(seconds);
        }

        if let Some(max_redirects) = lookup("RAVEN_MAX_REDIRECTS") {
            self.max_redirects = max_redirects.parse().map_err(|_| {
                RavenError::Config(format!(
                    "RAVEN_MAX_REDIRECTS is not an integer: {}",
                    max_redirects
                ))
            })?;
        }

        Ok(self)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(RavenError::Config("timeout must be greater than 0".to_string()));
        }

        Ok(())
    }
}
