//! Capture-facing entry point.
//!
//! [`EventIntake::submit`] is synchronous and never fails. An admitted event lands in an in-memory
//! pending list; a background worker waits for the debounce window to go quiet, then drains the
//! list to the orchestrator in fixed-size batches with a pause between them. Events inside one
//! drain are forwarded in capture order.

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::event::{new_session_id, Event, EventBuilder};
use crate::orchestrator::DeliveryOrchestrator;
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::throttle::{Decision, SourceThrottle};
use crate::transport::DeliveryMode;
use futures::future::join_all;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Page path and user agent stamped onto events built by [`EventIntake::event`].
#[derive(Debug, Clone, Default)]
struct HostContext {
    source_page: String,
    client_context: String,
}

/// Admission control plus batched forwarding. Clones share one intake.
#[derive(Debug, Clone)]
pub struct EventIntake {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    orchestrator: DeliveryOrchestrator,
    throttle: SourceThrottle,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    session_id: String,
    context: Mutex<HostContext>,
    pending: Mutex<VecDeque<Event>>,
    enabled: AtomicBool,
    suppressed: AtomicU64,
    wake: Notify,
    batch_size: usize,
    batch_pause: Duration,
    debounce: Duration,
}

impl EventIntake {
    pub fn new(orchestrator: DeliveryOrchestrator, config: &EngineConfig) -> Self {
        Self::with_parts(orchestrator, config, Arc::new(SystemClock), Arc::new(TokioSleeper))
    }

    pub fn with_parts(
        orchestrator: DeliveryOrchestrator,
        config: &EngineConfig,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let session_id = new_session_id(clock.now_millis());
        Self {
            inner: Arc::new(Inner {
                orchestrator,
                throttle: SourceThrottle::new(
                    Arc::clone(&clock),
                    config.throttle_window,
                    config.throttle_max_keys,
                ),
                clock,
                sleeper,
                session_id,
                context: Mutex::new(HostContext::default()),
                pending: Mutex::new(VecDeque::new()),
                enabled: AtomicBool::new(config.enabled),
                suppressed: AtomicU64::new(0),
                wake: Notify::new(),
                batch_size: config.batch_size,
                batch_pause: config.batch_pause,
                debounce: config.debounce,
            }),
        }
    }

    /// Fixed for the lifetime of this intake.
    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn set_source_page(&self, page: impl Into<String>) {
        lock(&self.inner.context).source_page = page.into();
    }

    pub fn set_client_context(&self, context: impl Into<String>) {
        lock(&self.inner.context).client_context = context.into();
    }

    /// Builder pre-stamped with the session id, the capture time and the host context.
    pub fn event(
        &self,
        kind: impl Into<String>,
        category: impl Into<String>,
        action: impl Into<String>,
    ) -> EventBuilder {
        let context = lock(&self.inner.context).clone();
        Event::builder(kind, category, action)
            .session_id(self.inner.session_id.clone())
            .captured_at(self.inner.clock.now_millis())
            .source_page(context.source_page)
            .client_context(context.client_context)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    /// Queue an event, throttled by its derived source key.
    pub fn submit(&self, event: Event) {
        let key = event.source_key();
        self.submit_keyed(&key, event);
    }

    /// Queue an event, throttled by a caller-supplied source key.
    pub fn submit_keyed(&self, key: &str, event: Event) {
        if !self.is_enabled() {
            tracing::trace!(key, "intake disabled; event dropped");
            return;
        }
        if let Decision::Suppressed { wait } = self.inner.throttle.check(key) {
            self.inner.suppressed.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(key, wait_ms = wait.as_millis() as u64, "submission throttled");
            return;
        }
        lock(&self.inner.pending).push_back(event);
        self.inner.wake.notify_one();
    }

    /// Events admitted but not yet forwarded.
    pub fn pending_len(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    /// Submissions dropped by the throttle so far.
    pub fn suppressed(&self) -> u64 {
        self.inner.suppressed.load(Ordering::Relaxed)
    }

    /// Drop every pending event. The durable queue is untouched.
    pub fn clear(&self) {
        lock(&self.inner.pending).clear();
    }

    /// Drain the pending list now; returns how many events were forwarded.
    pub async fn flush(&self) -> usize {
        self.flush_with(DeliveryMode::Normal).await
    }

    /// Drain for a host that is tearing down. Events the beacon cannot take are persisted.
    pub async fn flush_on_unload(&self) -> usize {
        self.flush_with(DeliveryMode::Unloading).await
    }

    async fn flush_with(&self, mode: DeliveryMode) -> usize {
        let drained: Vec<Event> = lock(&self.inner.pending).drain(..).collect();
        let total = drained.len();
        for (index, batch) in drained.chunks(self.inner.batch_size.max(1)).enumerate() {
            if index > 0 {
                self.inner.sleeper.sleep(self.inner.batch_pause).await;
            }
            let orchestrator = &self.inner.orchestrator;
            join_all(batch.iter().cloned().map(|event| orchestrator.send_with(event, mode))).await;
        }
        if total > 0 {
            tracing::debug!(forwarded = total, "intake drained");
        }
        total
    }

    /// Spawn the debounce worker. Abort the handle to stop it.
    pub fn start(&self) -> JoinHandle<()> {
        let intake = self.clone();
        tokio::spawn(async move {
            loop {
                intake.inner.wake.notified().await;
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(intake.inner.debounce) => break,
                        _ = intake.inner.wake.notified() => continue,
                    }
                }
                intake.flush().await;
            }
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
