//! One-stop assembly of the delivery engine.
//!
//! ```rust
//! use lastmile::{Engine, EngineConfig, Lifecycle};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let lifecycle = Lifecycle::new();
//! let mut engine = Engine::builder(EngineConfig::default()).build().unwrap();
//! engine.start();
//! engine.listen(&lifecycle);
//!
//! let event = engine.event("page_view", "navigation", "view").build();
//! engine.submit(event);
//! assert_eq!(engine.pending_count().await, 0);
//! engine.shutdown();
//! # });
//! ```

use crate::blocker::{BaitHost, BlockerProbe, Reachability};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::diagnostics::Diagnostics;
use crate::error::{ConfigError, StoreError};
use crate::event::{Event, EventBuilder};
use crate::intake::EventIntake;
use crate::lifecycle::{Lifecycle, LifecycleSignal};
use crate::orchestrator::DeliveryOrchestrator;
use crate::scheduler::RetryScheduler;
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::store::{DurableQueueStore, MemoryBackend, QueueBackend};
use crate::transport::{Transport, TransportChain, Unsupported};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Builder for [`Engine`]. Anything not supplied falls back to a harmless default: missing
/// transports are [`Unsupported`], a missing backend is in-memory.
#[derive(Debug)]
pub struct EngineBuilder {
    config: EngineConfig,
    alternate: Option<Arc<dyn Transport>>,
    beacon: Option<Arc<dyn Transport>>,
    canonical: Option<Arc<dyn Transport>>,
    backend: Option<Result<Arc<dyn QueueBackend>, StoreError>>,
    reachability: Option<Arc<dyn Reachability>>,
    bait_host: Option<Arc<dyn BaitHost>>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    diagnostics: Diagnostics,
}

impl EngineBuilder {
    pub fn alternate(mut self, transport: Arc<dyn Transport>) -> Self {
        self.alternate = Some(transport);
        self
    }

    pub fn beacon(mut self, transport: Arc<dyn Transport>) -> Self {
        self.beacon = Some(transport);
        self
    }

    pub fn canonical(mut self, transport: Arc<dyn Transport>) -> Self {
        self.canonical = Some(transport);
        self
    }

    /// Result of opening the durable substrate; an error degrades the store to a no-op.
    pub fn backend(mut self, opened: Result<Arc<dyn QueueBackend>, StoreError>) -> Self {
        self.backend = Some(opened);
        self
    }

    /// Enables the blocker probe.
    pub fn reachability(mut self, reachability: Arc<dyn Reachability>) -> Self {
        self.reachability = Some(reachability);
        self
    }

    pub fn bait_host(mut self, host: Arc<dyn BaitHost>) -> Self {
        self.bait_host = Some(host);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn build(self) -> Result<Engine, ConfigError> {
        let config = self.config;
        config.validate()?;
        let diagnostics = self.diagnostics.with_dev_mode(config.dev_mode);

        let unsupported = || -> Arc<dyn Transport> { Arc::new(Unsupported) };
        let mut chain = TransportChain::standard(
            self.alternate.unwrap_or_else(unsupported),
            self.beacon.unwrap_or_else(unsupported),
            self.canonical.unwrap_or_else(unsupported),
        )
        .with_attempt_timeout(config.request_timeout)
        .with_diagnostics(diagnostics.clone());

        let probe = self.reachability.map(|reachability| {
            let mut probe = BlockerProbe::new(reachability, &config)
                .with_clock(Arc::clone(&self.clock))
                .with_diagnostics(diagnostics.clone());
            if let Some(host) = self.bait_host {
                probe = probe.with_bait_host(host);
            }
            Arc::new(probe)
        });
        if let Some(probe) = &probe {
            chain = chain.with_probe(Arc::clone(probe));
        }
        let chain = Arc::new(chain);

        let opened = self.backend.unwrap_or_else(|| Ok(Arc::new(MemoryBackend::new())));
        let store = DurableQueueStore::open_or_disabled(opened, &config)
            .with_clock(Arc::clone(&self.clock))
            .with_diagnostics(diagnostics.clone());

        let orchestrator = DeliveryOrchestrator::new(Arc::clone(&chain), store.clone())
            .with_diagnostics(diagnostics.clone());
        let scheduler = RetryScheduler::with_parts(
            chain,
            store.clone(),
            Arc::clone(&self.sleeper),
            diagnostics,
            &config,
        );
        let intake = EventIntake::with_parts(orchestrator, &config, self.clock, self.sleeper);

        Ok(Engine { config, intake, scheduler, store, probe, tasks: Vec::new() })
    }
}

/// The assembled engine: intake, orchestrator, retry scheduler and durable store.
///
/// Background work starts with [`Engine::start`] and [`Engine::listen`] and stops with
/// [`Engine::shutdown`] or on drop.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    intake: EventIntake,
    scheduler: RetryScheduler,
    store: DurableQueueStore,
    probe: Option<Arc<BlockerProbe>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            alternate: None,
            beacon: None,
            canonical: None,
            backend: None,
            reachability: None,
            bait_host: None,
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
            diagnostics: Diagnostics::null(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Spawn the intake debounce worker and the periodic retry sweep.
    pub fn start(&mut self) {
        self.tasks.push(self.intake.start());
        self.tasks.push(self.scheduler.spawn_periodic());
    }

    /// Flush on every lifecycle checkpoint published through `lifecycle`.
    pub fn listen(&mut self, lifecycle: &Lifecycle) {
        let mut signals = lifecycle.subscribe();
        let intake = self.intake.clone();
        let scheduler = self.scheduler.clone();
        self.tasks.push(tokio::spawn(async move {
            loop {
                match signals.recv().await {
                    Ok(LifecycleSignal::Loaded) => {
                        tokio::task::yield_now().await;
                        scheduler.flush_pending().await;
                    }
                    Ok(LifecycleSignal::Unloading) => {
                        intake.flush_on_unload().await;
                        scheduler.flush_on_unload().await;
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::debug!(missed, "lifecycle signals lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
    }

    /// Abort every background task. Work already in flight is abandoned.
    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.tasks.iter().any(|task| !task.is_finished())
    }

    pub fn intake(&self) -> &EventIntake {
        &self.intake
    }

    pub fn scheduler(&self) -> &RetryScheduler {
        &self.scheduler
    }

    pub fn store(&self) -> &DurableQueueStore {
        &self.store
    }

    pub fn probe(&self) -> Option<&Arc<BlockerProbe>> {
        self.probe.as_ref()
    }

    pub fn session_id(&self) -> &str {
        self.intake.session_id()
    }

    pub fn event(
        &self,
        kind: impl Into<String>,
        category: impl Into<String>,
        action: impl Into<String>,
    ) -> EventBuilder {
        self.intake.event(kind, category, action)
    }

    pub fn submit(&self, event: Event) {
        self.intake.submit(event);
    }

    pub fn submit_keyed(&self, key: &str, event: Event) {
        self.intake.submit_keyed(key, event);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.intake.set_enabled(enabled);
    }

    /// Drop in-memory pending events.
    pub fn clear(&self) {
        self.intake.clear();
    }

    pub async fn flush_pending(&self) -> usize {
        self.scheduler.flush_pending().await
    }

    /// Records waiting in the durable queue.
    pub async fn pending_count(&self) -> usize {
        self.store.count().await
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
