//! HTTP transport layer for delivering encoded events to the collector

use crate::config::Config;
use crate::errors::{RavenError, Result};
use reqwest::header::{ACCEPT_ENCODING, CONNECTION, CONTENT_TYPE, LOCATION};
use reqwest::{Client, Response, StatusCode, redirect};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};
use url::Url;

pub const AUTH_HEADER: &str = "X-Sentry-Auth";
pub const PROTOCOL_VERSION: &str = "2.0";
pub const CLIENT_NAME: &str = concat!("raven-client/", env!("CARGO_PKG_VERSION"));

/// HTTP transport for encoded events
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    store_url: Url,
    public_key: String,
    timeout: Duration,
    max_redirects: usize,
}

impl HttpTransport {
    /// Create a new HTTP transport
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .pool_max_idle_per_host(0)
            .user_agent(CLIENT_NAME)
            .build()
            .map_err(RavenError::Http)?;

        Ok(Self {
            client,
            store_url: config.dsn.store_url(),
            public_key: config.dsn.public_key().to_string(),
            timeout: config.timeout,
            max_redirects: config.max_redirects,
        })
    }

    pub fn store_url(&self) -> &Url {
        &self.store_url
    }

    /// Value of the authentication header for an event sent at `timestamp`
    pub fn auth_header(&self, timestamp: i64) -> String {
        format!(
            "Sentry sentry_version={}, sentry_client={}, sentry_timestamp={}, sentry_key={}",
            PROTOCOL_VERSION, CLIENT_NAME, timestamp, self.public_key
        )
    }

    /// Deliver an encoded event.
    ///
    /// The whole exchange, redirects included, must finish within the
    /// configured timeout; an expired request is dropped mid-flight.
    pub async fn send(&self, packet: Vec<u8>, timestamp: i64) -> Result<()> {
        let auth = self.auth_header(timestamp);

        timeout(self.timeout, self.deliver(&packet, &auth))
            .await
            .map_err(|_| {
                warn!("Delivery to {} timed out after {:?}", self.store_url, self.timeout);
                RavenError::Timeout(self.timeout)
            })?
    }

    async fn deliver(&self, packet: &[u8], auth: &str) -> Result<()> {
        let mut url = self.store_url.clone();

        for hop in 0..=self.max_redirects {
            debug!("Posting {} bytes to {} (hop {})", packet.len(), url, hop);
            let response = self.post(&url, packet, auth).await?;

            match response.status() {
                StatusCode::OK => {
                    debug!("Event accepted by {}", url);
                    return Ok(());
                }
                StatusCode::MOVED_PERMANENTLY => {
                    url = redirect_target(&url, &response)?;
                }
                status => {
                    let body = response.text().await.unwrap_or_default();
                    warn!("Collector at {} answered {}: {}", url, status, body);
                    return Err(RavenError::Status(status));
                }
            }
        }

        Err(RavenError::TooManyRedirects(self.max_redirects))
    }

    /// Single POST attempt
    async fn post(&self, url: &Url, packet: &[u8], auth: &str) -> Result<Response> {
        let response = self
            .client
            .post(url.clone())
            .header(AUTH_HEADER, auth)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONNECTION, "close")
            .header(ACCEPT_ENCODING, "identity")
            .body(packet.to_vec())
            .send()
            .await?;

        Ok(response)
    }
}

/// Resolve the `Location` of a redirect against the URL that produced it
fn redirect_target(current: &Url, response: &Response) -> Result<Url> {
    let location = response
        .headers()
        .get(LOCATION)
        .ok_or_else(|| RavenError::Transport(format!("redirect from {} without Location", current)))?
        .to_str()
        .map_err(|_| RavenError::Transport(format!("unreadable Location header from {}", current)))?;

    let target = current.join(location)?;
    debug!("Following redirect from {} to {}", current, target);
    Ok(target)
}
