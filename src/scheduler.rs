//! Redelivery of persisted records.
//!
//! A flush pass takes up to `retry_batch_limit` eligible records and retries them one at a time
//! straight through the [`TransportChain`]. Going around the orchestrator matters: its terminal
//! fallback would persist a second copy of a record that is already stored.
//!
//! Only one pass runs at a time. A call that finds a pass in flight returns 0 immediately.
//!
//! A record is charged an attempt only when some strategy actually tried to transmit it. During
//! an unload with no working beacon nothing is sent, so nothing is counted.

use crate::config::EngineConfig;
use crate::diagnostics::{DeliveryEvent, Diagnostics};
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::store::DurableQueueStore;
use crate::transport::{DeliveryMode, TransportChain};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Periodic and on-demand drain of the durable queue.
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    chain: Arc<TransportChain>,
    store: DurableQueueStore,
    sleeper: Arc<dyn Sleeper>,
    diagnostics: Diagnostics,
    in_flight: AtomicBool,
    batch_limit: usize,
    pause: Duration,
    interval: Duration,
}

/// Clears the in-flight flag however the pass ends.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl RetryScheduler {
    pub fn new(chain: Arc<TransportChain>, store: DurableQueueStore, config: &EngineConfig) -> Self {
        Self::with_parts(chain, store, Arc::new(TokioSleeper), Diagnostics::null(), config)
    }

    pub fn with_parts(
        chain: Arc<TransportChain>,
        store: DurableQueueStore,
        sleeper: Arc<dyn Sleeper>,
        diagnostics: Diagnostics,
        config: &EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                chain,
                store,
                sleeper,
                diagnostics,
                in_flight: AtomicBool::new(false),
                batch_limit: config.retry_batch_limit,
                pause: config.retry_pause,
                interval: config.flush_interval,
            }),
        }
    }

    /// Whether a flush pass is running right now.
    pub fn is_flushing(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Run one pass; returns the number of records delivered and removed.
    pub async fn flush_pending(&self) -> usize {
        self.flush_with(DeliveryMode::Normal).await
    }

    /// Pass for a host that is tearing down: only unload-safe strategies are attempted.
    pub async fn flush_on_unload(&self) -> usize {
        self.flush_with(DeliveryMode::Unloading).await
    }

    async fn flush_with(&self, mode: DeliveryMode) -> usize {
        let inner = &self.inner;
        if inner
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::trace!("flush already in flight");
            return 0;
        }
        let _guard = FlightGuard(&inner.in_flight);

        let records = inner.store.list_eligible(inner.batch_limit).await;
        let total = records.len();
        let mut delivered = 0;
        for (position, record) in records.into_iter().enumerate() {
            if position > 0 {
                inner.sleeper.sleep(inner.pause).await;
            }
            let report = inner.chain.deliver_with(&record.event, mode).await;
            if !report.reached_transport() {
                tracing::debug!(record_id = %record.id, ?mode, "no usable transport; attempt not counted");
                continue;
            }
            if report.delivered {
                inner.store.remove(&record.id).await;
                delivered += 1;
            } else {
                inner.store.increment_attempt(&record.id).await;
            }
            tracing::debug!(
                record_id = %record.id,
                attempt = record.attempt_count + 1,
                delivered = report.delivered,
                "retried stored record"
            );
            inner
                .diagnostics
                .emit(DeliveryEvent::Retried { record_id: record.id, delivered: report.delivered })
                .await;
        }

        let evicted = inner.store.evict_exhausted().await;
        if total > 0 || evicted > 0 {
            tracing::debug!(delivered, evicted, pending = total - delivered, "flush pass finished");
        }
        inner.diagnostics.emit(DeliveryEvent::FlushCompleted { delivered }).await;
        delivered
    }

    /// Sweep every `flush_interval` until the handle is aborted. The first sweep happens one
    /// interval after the call.
    pub fn spawn_periodic(&self) -> JoinHandle<()> {
        let scheduler = self.clone();
        let period = self.inner.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                scheduler.flush_pending().await;
            }
        })
    }
}
