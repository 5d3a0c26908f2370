//! Event client orchestrating capture, encoding and delivery

use crate::config::Config;
use crate::dsn::Dsn;
use crate::encoder::{EventEncoder, PacketEncoder};
use crate::errors::Result;
use crate::event::Event;
use crate::stacktrace;
use crate::transport::HttpTransport;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Reports events to a collector.
///
/// A client is cheap to clone and holds no mutable state, so concurrent
/// captures through clones are independent of each other.
#[derive(Clone)]
pub struct Client {
    config: Config,
    encoder: Arc<dyn EventEncoder>,
    transport: HttpTransport,
}

impl Client {
    /// Create a client for the collector identified by `dsn`
    pub fn new(dsn: &str) -> Result<Self> {
        Self::from_config(Config::parse(dsn)?)
    }

    pub fn from_config(config: Config) -> Result<Self> {
        config.validate()?;
        let transport = HttpTransport::new(&config)?;

        Ok(Self {
            config,
            encoder: Arc::new(PacketEncoder::default()),
            transport,
        })
    }

    /// Replace the encoder used to build request bodies
    pub fn with_encoder(mut self, encoder: Arc<dyn EventEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn dsn(&self) -> &Dsn {
        &self.config.dsn
    }

    pub fn project(&self) -> &str {
        self.config.dsn.project()
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    /// Send a message made of `parts` joined by single spaces.
    ///
    /// Returns the id of the delivered event.
    pub async fn capture_message<S: AsRef<str>>(&self, parts: &[S]) -> Result<String> {
        let message = parts
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(" ");
        let mut event = Event::new(message);
        self.capture(&mut event).await
    }

    /// Like [`Client::capture_message`] with a `format_args!` message
    pub fn capture_message_fmt<'a>(
        &'a self,
        args: fmt::Arguments<'_>,
    ) -> impl Future<Output = Result<String>> + Send + use<'a> {
        let message = fmt::format(args);
        async move { self.capture_message(&[message]).await }
    }

    /// Send `event`, filling its unset fields in place.
    ///
    /// `project` is always replaced by the client's project id. A stack trace
    /// is captured when the event carries none.
    #[instrument(skip(self, event), fields(project = %self.project()))]
    pub async fn capture(&self, event: &mut Event) -> Result<String> {
        event.fill_defaults(self.project())?;
        if event.stacktrace.is_empty() {
            event.stacktrace = stacktrace::capture();
        }
        let timestamp = event.unix_timestamp()?;

        let packet = self.encoder.encode(event)?;

        if let Err(e) = self.transport.send(packet, timestamp).await {
            warn!("Failed to deliver event {}: {}", event.event_id, e);
            return Err(e);
        }

        debug!("Delivered event {} ({})", event.event_id, event.level);
        Ok(event.event_id.clone())
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.config.dsn.endpoint().as_str())
            .field("project", &self.project())
            .field("timeout", &self.config.timeout)
            .finish_non_exhaustive()
    }
}
