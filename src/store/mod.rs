//! Durable retry queue.
//!
//! [`DurableQueueStore`] owns every persisted record. It is bounded twice over:
//! - at most `max_records` records; admitting a new one when full evicts the oldest by
//!   `enqueued_at` first;
//! - a record whose `attempt_count` reached `max_retries` is never listed as eligible again and
//!   is deleted by the next [`DurableQueueStore::evict_exhausted`].
//!
//! The persistent substrate sits behind [`QueueBackend`]. Each backend method is one atomic
//! transaction, so a read-modify-write such as `increment_attempt` cannot interleave with an
//! eviction sweep. Backend failures never escape the store: they are logged at `warn` and the
//! operation degrades to a no-op (writes vanish, reads come back empty). A store built without
//! a backend behaves the same way from the start.

mod memory;

pub use memory::MemoryBackend;

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::diagnostics::{DeliveryEvent, Diagnostics};
use crate::error::StoreError;
use crate::event::{base36_suffix, Event};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Name of the durable database.
pub const STORE_NAME: &str = "analytics_events_db";
/// Name of the record collection inside it.
pub const COLLECTION_NAME: &str = "failed_events";
/// Current schema version; upgrades are additive.
pub const SCHEMA_VERSION: u32 = 1;

const ID_SUFFIX_LEN: usize = 9;

/// Durability wrapper around an [`Event`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    /// `{enqueued_at}-{random suffix}`; primary key.
    pub id: String,
    pub event: Event,
    /// Milliseconds since the Unix epoch at first storage.
    pub enqueued_at: u64,
    /// Failed re-delivery attempts so far.
    pub attempt_count: u32,
    pub last_attempt_at: Option<u64>,
}

impl StoredRecord {
    pub fn new(event: Event, enqueued_at: u64) -> Self {
        Self {
            id: format!("{}-{}", enqueued_at, base36_suffix(ID_SUFFIX_LEN)),
            event,
            enqueued_at,
            attempt_count: 0,
            last_attempt_at: None,
        }
    }

    pub fn is_exhausted(&self, max_retries: u32) -> bool {
        self.attempt_count >= max_retries
    }
}

/// Persistent substrate behind the durable queue.
///
/// Every method must run as a single atomic transaction.
#[async_trait]
pub trait QueueBackend: Send + Sync + std::fmt::Debug {
    /// Delete oldest records (by `enqueued_at`) until fewer than `max_records` remain, then insert.
    /// Returns the number of records evicted.
    async fn insert_capped(
        &self,
        record: StoredRecord,
        max_records: usize,
    ) -> Result<usize, StoreError>;

    /// Up to `limit` records with `attempt_count < max_retries`, oldest first.
    async fn list_eligible(
        &self,
        limit: usize,
        max_retries: u32,
    ) -> Result<Vec<StoredRecord>, StoreError>;

    /// Bump `attempt_count` (saturating at `max_retries`) and stamp `last_attempt_at`.
    /// Returns `false` when no record has this id.
    async fn increment_attempt(
        &self,
        id: &str,
        attempted_at: u64,
        max_retries: u32,
    ) -> Result<bool, StoreError>;

    /// Returns `false` when no record has this id.
    async fn remove(&self, id: &str) -> Result<bool, StoreError>;

    /// Delete every record with `attempt_count >= max_retries`; returns how many.
    async fn remove_exhausted(&self, max_retries: u32) -> Result<usize, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}

/// Bounded, persistent queue of undelivered events.
#[derive(Debug, Clone)]
pub struct DurableQueueStore {
    backend: Option<Arc<dyn QueueBackend>>,
    clock: Arc<dyn Clock>,
    diagnostics: Diagnostics,
    max_records: usize,
    max_retries: u32,
}

impl DurableQueueStore {
    pub fn new(backend: Arc<dyn QueueBackend>, config: &EngineConfig) -> Self {
        Self {
            backend: Some(backend),
            clock: Arc::new(SystemClock),
            diagnostics: Diagnostics::null(),
            max_records: config.max_records,
            max_retries: config.max_retries,
        }
    }

    /// A store that silently drops writes and reads back nothing.
    pub fn disabled(config: &EngineConfig) -> Self {
        Self { backend: None, ..Self::new(Arc::new(MemoryBackend::new()), config) }
    }

    /// Use the opened backend, or fall back to [`DurableQueueStore::disabled`] if opening failed.
    pub fn open_or_disabled(
        opened: Result<Arc<dyn QueueBackend>, StoreError>,
        config: &EngineConfig,
    ) -> Self {
        match opened {
            Ok(backend) => Self::new(backend, config),
            Err(error) => {
                tracing::warn!(%error, "durable store unavailable; undelivered events will not persist");
                Self::disabled(config)
            }
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Whether writes actually reach a persistent substrate.
    pub fn is_durable(&self) -> bool {
        self.backend.is_some()
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn max_records(&self) -> usize {
        self.max_records
    }

    /// Wrap and persist an event, evicting the oldest record first if the store is full.
    ///
    /// Returns the new record id, or `None` when the write did not happen.
    pub async fn enqueue(&self, event: Event) -> Option<String> {
        let backend = self.backend.as_ref()?;
        let record = StoredRecord::new(event, self.clock.now_millis());
        let id = record.id.clone();
        match backend.insert_capped(record, self.max_records).await {
            Ok(evicted) => {
                if evicted > 0 {
                    self.diagnostics.emit(DeliveryEvent::Evicted { count: evicted }).await;
                }
                Some(id)
            }
            Err(error) => {
                tracing::warn!(%error, "durable enqueue failed; event dropped");
                None
            }
        }
    }

    /// Up to `limit` retryable records, oldest first.
    pub async fn list_eligible(&self, limit: usize) -> Vec<StoredRecord> {
        let Some(backend) = &self.backend else {
            return Vec::new();
        };
        match backend.list_eligible(limit, self.max_retries).await {
            Ok(records) => records,
            Err(error) => {
                tracing::warn!(%error, "listing durable records failed");
                Vec::new()
            }
        }
    }

    pub async fn increment_attempt(&self, id: &str) {
        let Some(backend) = &self.backend else {
            return;
        };
        let now = self.clock.now_millis();
        match backend.increment_attempt(id, now, self.max_retries).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!(record_id = id, "increment on missing record ignored"),
            Err(error) => tracing::warn!(%error, record_id = id, "recording retry attempt failed"),
        }
    }

    /// Delete a record after confirmed delivery.
    pub async fn remove(&self, id: &str) {
        let Some(backend) = &self.backend else {
            return;
        };
        if let Err(error) = backend.remove(id).await {
            tracing::warn!(%error, record_id = id, "removing delivered record failed");
        }
    }

    /// Delete every record that used up its attempts; returns how many went.
    pub async fn evict_exhausted(&self) -> usize {
        let Some(backend) = &self.backend else {
            return 0;
        };
        match backend.remove_exhausted(self.max_retries).await {
            Ok(0) => 0,
            Ok(evicted) => {
                self.diagnostics.emit(DeliveryEvent::Evicted { count: evicted }).await;
                evicted
            }
            Err(error) => {
                tracing::warn!(%error, "evicting exhausted records failed");
                0
            }
        }
    }

    pub async fn count(&self) -> usize {
        let Some(backend) = &self.backend else {
            return 0;
        };
        match backend.count().await {
            Ok(count) => count,
            Err(error) => {
                tracing::warn!(%error, "counting durable records failed");
                0
            }
        }
    }
}
