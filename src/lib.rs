#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # lastmile
//!
//! Resilient client-side telemetry delivery: get events to a collector despite blocking
//! extensions, flaky networks and a host that may disappear mid-flight.
//!
//! ## Features
//!
//! - **Transport fallthrough**: alternate endpoint, unload-safe beacon, canonical endpoint
//! - **Durable retry queue** bounded in size and in attempts per record
//! - **Retry scheduler** with a single-flight flush, a periodic sweep and lifecycle triggers
//! - **Blocker probe** with per-endpoint TTL caching that biases strategy order
//! - **Admission control**: per-source throttling and debounced, paced batching
//!
//! ## Quick Start
//!
//! ```rust
//! use async_trait::async_trait;
//! use lastmile::prelude::*;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! #[derive(Debug, Default)]
//! struct Collector(AtomicUsize);
//!
//! #[async_trait]
//! impl Transport for Collector {
//!     async fn attempt(&self, _event: &Event) -> Result<Receipt, TransportError> {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         Ok(Receipt::Status(202))
//!     }
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let collector = Arc::new(Collector::default());
//! let engine = Engine::builder(EngineConfig::default())
//!     .alternate(collector.clone())
//!     .build()
//!     .unwrap();
//!
//! engine.submit(engine.event("ecommerce", "shop", "add_to_cart").label("sku-42").build());
//! engine.intake().flush().await;
//!
//! assert_eq!(collector.0.load(Ordering::SeqCst), 1);
//! assert_eq!(engine.pending_count().await, 0);
//! # });
//! ```

pub mod blocker;
pub mod clock;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod event;
pub mod intake;
pub mod lifecycle;
pub mod orchestrator;
pub mod prelude;
pub mod scheduler;
pub mod sleeper;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod throttle;
pub mod transport;

// Re-exports
pub use blocker::{BaitHost, BlockerProbe, BlockerProbeResult, ProbeMethod, Reachability};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, EngineConfigBuilder, Endpoints};
pub use diagnostics::{DeliveryEvent, Diagnostics};
pub use engine::{Engine, EngineBuilder};
pub use error::{ConfigError, FailureKind, StoreError, TransportError};
pub use event::{Event, EventBuilder};
pub use intake::EventIntake;
pub use lifecycle::{Lifecycle, LifecycleSignal};
pub use orchestrator::{DeliveryOrchestrator, SendOutcome};
pub use scheduler::RetryScheduler;
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use store::{DurableQueueStore, MemoryBackend, QueueBackend, StoredRecord};
pub use throttle::{Decision, SourceThrottle};
pub use transport::{
    DeliveryMode, DeliveryReport, Receipt, StrategyDescriptor, StrategyKind, Transport,
    TransportChain, Unsupported,
};
