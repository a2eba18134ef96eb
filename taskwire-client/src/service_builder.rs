//! Service builder
//!
//! The `ServiceBuilder` configures a [`SocketService`] before its
//! connection task starts. It covers:
//! - the endpoint, given directly or resolved from the page URL
//! - the reconnection strategy (fixed 500 ms by default)
//! - queue capacity, request timeout and stream buffering
//! - OpenTelemetry observability and the service name it reports
//!
//! # Examples
//!
//! ```rust,no_run
//! use taskwire_client::{ExponentialBackoff, ServiceBuilder};
//! use std::time::Duration;
//!
//! # async fn example() -> taskwire_core::Result<()> {
//! // Defaults: fixed 500 ms reconnect, 16 queued frames, no timeout
//! let service = ServiceBuilder::from_page_url("http://localhost:5000/")?
//!     .connect()
//!     .await?;
//!
//! let tuned = ServiceBuilder::new("ws://localhost:5000/api/ws")
//!     .with_reconnect(
//!         ExponentialBackoff::new(Duration::from_millis(250), Duration::from_secs(10))
//!             .with_jitter(),
//!     )
//!     .request_timeout(Duration::from_secs(30))
//!     .with_default_observability()
//!     .service_name("explorer-frontend")
//!     .connect()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::{
    connection_state::ConnectionManager,
    endpoint::socket_url,
    queue::{OutgoingQueue, DEFAULT_QUEUE_CAPACITY},
    reconnect::{FixedDelay, ReconnectionStrategy},
    request::RequestManager,
    router::MessageRouter,
    service::{Link, SocketService, PROBLEM_CHANNEL_CAPACITY},
    ClientMetrics,
};
use std::sync::atomic::AtomicI64;
use std::sync::Arc;
use std::time::Duration;
use taskwire_core::{Error, ObservabilityConfig, Result};
use tokio::sync::{broadcast, watch, Mutex};
use url::Url;

/// Builder for configuring and starting a [`SocketService`]
pub struct ServiceBuilder {
    url: String,
    reconnect_strategy: Option<Box<dyn ReconnectionStrategy>>,
    queue_capacity: usize,
    request_timeout: Option<Duration>,
    generation_id: i64,
    observability_config: Option<ObservabilityConfig>,
    service_name: Option<String>,
}

impl ServiceBuilder {
    /// Builder for a socket endpoint URL (`ws://` or `wss://`)
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_strategy: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            request_timeout: None,
            generation_id: 0,
            observability_config: None,
            service_name: None,
        }
    }

    /// Builder for the endpoint that serves the page at `page_url`
    ///
    /// See [`socket_url`] for the mapping.
    pub fn from_page_url(page_url: &str) -> Result<Self> {
        Ok(Self::new(socket_url(page_url)?))
    }

    /// Reconnect using the given strategy
    pub fn with_reconnect(mut self, strategy: impl ReconnectionStrategy + 'static) -> Self {
        self.reconnect_strategy = Some(Box::new(strategy));
        self
    }

    /// Reconnect every 500 ms forever (default)
    pub fn with_default_reconnect(mut self) -> Self {
        self.reconnect_strategy = None;
        self
    }

    /// Maximum frames held while disconnected
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Fail tasks, and chat streams waiting for their next chunk, after `timeout`
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Generation id attached to tasks until changed on the service
    pub fn generation_id(mut self, generation_id: i64) -> Self {
        self.generation_id = generation_id;
        self
    }

    /// Enable OpenTelemetry observability with custom configuration
    pub fn with_observability(mut self, config: ObservabilityConfig) -> Self {
        self.observability_config = Some(config);
        self
    }

    /// Enable OpenTelemetry observability with default configuration
    pub fn with_default_observability(mut self) -> Self {
        self.observability_config = Some(ObservabilityConfig::default());
        self
    }

    /// Service name reported by observability, if enabled
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.url)
            .map_err(|e| Error::Configuration(format!("Invalid URL '{}': {}", self.url, e)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::Configuration(format!(
                "Expected a ws:// or wss:// URL, got '{}'",
                self.url
            )));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Configuration("queue capacity must be at least 1".to_string()));
        }
        if self.request_timeout == Some(Duration::ZERO) {
            return Err(Error::Configuration("request timeout must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Start the service
    ///
    /// Returns as soon as the connection task is spawned; the first
    /// connection attempt may still be in flight or have failed. Sends made
    /// before the socket opens are queued.
    pub async fn connect(self) -> Result<SocketService> {
        self.validate()?;

        let metrics = if let Some(mut config) = self.observability_config {
            if let Some(name) = self.service_name {
                config.service_name = name;
            }

            taskwire_core::init_observability(config.clone())
                .map_err(|e| Error::Internal(format!("Failed to initialize observability: {}", e)))?;

            Some(Arc::new(ClientMetrics::new(&config.service_name)))
        } else {
            None
        };

        let strategy = self
            .reconnect_strategy
            .unwrap_or_else(|| Box::new(FixedDelay::default()));
        let (problems, _) = broadcast::channel(PROBLEM_CHANNEL_CAPACITY);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let service = SocketService {
            url: self.url,
            link: Arc::new(Mutex::new(Link::new(OutgoingQueue::with_capacity(
                self.queue_capacity,
            )))),
            connection: Arc::new(ConnectionManager::new(strategy)),
            router: MessageRouter::new(),
            requests: RequestManager::new(),
            problems,
            generation_id: Arc::new(AtomicI64::new(self.generation_id)),
            request_timeout: self.request_timeout,
            shutdown: Arc::new(shutdown),
            metrics,
        };

        service.register_builtin_handlers().await;

        tracing::info!(url = %service.url, "Starting socket service");
        tokio::spawn(service.clone().run_connection(shutdown_rx));

        Ok(service)
    }
}
