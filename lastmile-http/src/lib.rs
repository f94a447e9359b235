//! HTTP delivery for `lastmile`, built on `reqwest`.
//!
//! - [`HttpTransport`]: POSTs the event JSON and reports the response status.
//! - [`BeaconTransport`]: fire-and-forget POST through a bounded queue drained by a background
//!   worker. `attempt` only reports whether the payload was queued.
//! - [`HttpReachability`]: HEAD request used by the blocker probe.
//!
//! [`HttpTransports::from_config`] builds all of them for the configured endpoints.

use async_trait::async_trait;
use lastmile::blocker::Reachability;
use lastmile::config::{EngineConfig, Endpoints};
use lastmile::engine::EngineBuilder;
use lastmile::error::TransportError;
use lastmile::transport::{Receipt, Transport};
use lastmile::Event;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

fn classify(error: &reqwest::Error) -> TransportError {
    if error.is_builder() {
        TransportError::Encode(error.to_string())
    } else {
        TransportError::Blocked(error.to_string())
    }
}

/// Request/response delivery to one collector URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    url: String,
}

impl HttpTransport {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self { client, url: url.into() }
    }

    pub fn alternate(client: Client, endpoints: &Endpoints) -> Self {
        Self::new(client, endpoints.alternate_url())
    }

    pub fn canonical(client: Client, endpoints: &Endpoints) -> Self {
        Self::new(client, endpoints.canonical_url())
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn attempt(&self, event: &Event) -> Result<Receipt, TransportError> {
        let body = event.to_json_bytes().map_err(|e| TransportError::Encode(e.to_string()))?;
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| classify(&e))?;
        Ok(Receipt::Status(response.status().as_u16()))
    }

    fn endpoint(&self) -> Option<&str> {
        Some(&self.url)
    }
}

/// Unload-safe delivery: payloads go onto a bounded queue and a worker task POSTs them.
///
/// No delivery confirmation exists; a queued payload counts as accepted. A full queue refuses
/// the payload, and a stopped worker makes the primitive unavailable.
#[derive(Debug, Clone)]
pub struct BeaconTransport {
    tx: mpsc::Sender<Vec<u8>>,
    url: String,
    refused: Arc<AtomicU64>,
}

impl BeaconTransport {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn(client: Client, url: impl Into<String>, capacity: usize) -> Self {
        let url = url.into();
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(capacity.max(1));
        let worker_url = url.clone();
        tokio::spawn(async move {
            while let Some(body) = rx.recv().await {
                let sent = client
                    .post(&worker_url)
                    .header(CONTENT_TYPE, "application/json")
                    .body(body)
                    .send()
                    .await;
                match sent {
                    Ok(response) if response.status().is_success() => {}
                    Ok(response) => {
                        tracing::debug!(status = response.status().as_u16(), "beacon rejected")
                    }
                    Err(error) => tracing::debug!(%error, "beacon send failed"),
                }
            }
        });
        Self { tx, url, refused: Arc::new(AtomicU64::new(0)) }
    }

    pub fn from_config(client: Client, config: &EngineConfig) -> Self {
        Self::spawn(client, config.endpoints.beacon_url(), config.beacon_capacity)
    }

    /// Payloads refused because the queue was full.
    pub fn refused(&self) -> u64 {
        self.refused.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for BeaconTransport {
    async fn attempt(&self, event: &Event) -> Result<Receipt, TransportError> {
        let body = event.to_json_bytes().map_err(|e| TransportError::Encode(e.to_string()))?;
        match self.tx.try_send(body) {
            Ok(()) => Ok(Receipt::Queued(true)),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.refused.fetch_add(1, Ordering::Relaxed);
                Ok(Receipt::Queued(false))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(TransportError::Unavailable),
        }
    }

    fn endpoint(&self) -> Option<&str> {
        Some(&self.url)
    }
}

/// HEAD-request reachability check.
#[derive(Debug, Clone)]
pub struct HttpReachability {
    client: Client,
}

impl HttpReachability {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Reachability for HttpReachability {
    async fn check(&self, endpoint: &str) -> Result<u16, TransportError> {
        let response = self.client.head(endpoint).send().await.map_err(|e| classify(&e))?;
        Ok(response.status().as_u16())
    }
}

/// Every HTTP piece the engine needs, sharing one connection pool.
#[derive(Debug, Clone)]
pub struct HttpTransports {
    pub alternate: HttpTransport,
    pub beacon: BeaconTransport,
    pub canonical: HttpTransport,
    pub reachability: HttpReachability,
}

impl HttpTransports {
    /// Must be called inside a tokio runtime: the beacon worker is spawned here.
    pub fn from_config(config: &EngineConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!("lastmile/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: &EngineConfig) -> Self {
        Self {
            alternate: HttpTransport::alternate(client.clone(), &config.endpoints),
            beacon: BeaconTransport::from_config(client.clone(), config),
            canonical: HttpTransport::canonical(client.clone(), &config.endpoints),
            reachability: HttpReachability::new(client),
        }
    }

    /// Plug every transport and the reachability check into an engine builder.
    pub fn install(self, builder: EngineBuilder) -> EngineBuilder {
        builder
            .alternate(Arc::new(self.alternate))
            .beacon(Arc::new(self.beacon))
            .canonical(Arc::new(self.canonical))
            .reachability(Arc::new(self.reachability))
    }
}
