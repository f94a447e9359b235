//! One event in, one terminal outcome out.

use crate::diagnostics::{DeliveryEvent, Diagnostics};
use crate::event::Event;
use crate::store::DurableQueueStore;
use crate::transport::{DeliveryMode, StrategyKind, TransportChain};
use std::sync::Arc;

/// Where a sent event ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered(StrategyKind),
    /// Every network strategy failed; the event was handed to the durable queue.
    Persisted,
}

/// Drives the [`TransportChain`] for a fresh event and falls back to the durable queue.
#[derive(Debug, Clone)]
pub struct DeliveryOrchestrator {
    chain: Arc<TransportChain>,
    store: DurableQueueStore,
    diagnostics: Diagnostics,
}

impl DeliveryOrchestrator {
    pub fn new(chain: Arc<TransportChain>, store: DurableQueueStore) -> Self {
        Self { chain, store, diagnostics: Diagnostics::null() }
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn chain(&self) -> &Arc<TransportChain> {
        &self.chain
    }

    pub fn store(&self) -> &DurableQueueStore {
        &self.store
    }

    /// Never fails: a delivery either lands or the event is persisted for retry.
    ///
    /// A persisted outcome is reported even when the durable store is degraded and dropped the
    /// write.
    pub async fn send(&self, event: Event) -> SendOutcome {
        self.send_with(event, DeliveryMode::Normal).await
    }

    pub async fn send_with(&self, event: Event, mode: DeliveryMode) -> SendOutcome {
        let report = self.chain.deliver_with(&event, mode).await;
        if let Some(via) = report.via.filter(|_| report.delivered) {
            return SendOutcome::Delivered(via);
        }

        tracing::debug!(
            strategy = %StrategyKind::DurableQueue,
            failures = report.failures.len(),
            "network strategies exhausted"
        );
        if self.store.enqueue(event).await.is_some() {
            self.diagnostics.emit(DeliveryEvent::Persisted).await;
        }
        SendOutcome::Persisted
    }
}
