//! Delivery diagnostics.
//!
//! Components report what happened to each event through a [`Diagnostics`] handle. The handle
//! logs through `tracing` (failures at `warn` in dev mode, `debug` otherwise) and forwards the
//! [`DeliveryEvent`] to a sink, which is any `tower::Service<DeliveryEvent>`.
//!
//! ```rust
//! use lastmile::diagnostics::{DeliveryEvent, Diagnostics, MemorySink};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let sink = MemorySink::new();
//! let diagnostics = Diagnostics::new(sink.clone());
//! diagnostics.emit(DeliveryEvent::Persisted).await;
//! assert_eq!(sink.events(), vec![DeliveryEvent::Persisted]);
//! # });
//! ```

pub mod events;
pub mod sinks;

pub use events::DeliveryEvent;
pub use sinks::{emit_best_effort, LogSink, MemorySink, NullSink};

use tower::util::BoxCloneSyncService;
use tower::ServiceExt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shared, cloneable handle to the configured sink.
#[derive(Clone)]
pub struct Diagnostics {
    sink: BoxCloneSyncService<DeliveryEvent, (), BoxError>,
    dev_mode: bool,
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnostics")
            .field("sink", &"<sink>")
            .field("dev_mode", &self.dev_mode)
            .finish()
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::null()
    }
}

impl Diagnostics {
    pub fn new<S>(sink: S) -> Self
    where
        S: tower::Service<DeliveryEvent, Response = ()> + Clone + Send + Sync + 'static,
        S::Error: Into<BoxError> + 'static,
        S::Future: Send + 'static,
    {
        let sink = sink.map_err(|e: S::Error| -> BoxError { e.into() });
        Self { sink: BoxCloneSyncService::new(sink), dev_mode: false }
    }

    /// Diagnostics that only go to `tracing`.
    pub fn null() -> Self {
        Self::new(NullSink)
    }

    pub fn with_dev_mode(mut self, dev_mode: bool) -> Self {
        self.dev_mode = dev_mode;
        self
    }

    pub fn dev_mode(&self) -> bool {
        self.dev_mode
    }

    pub async fn emit(&self, event: DeliveryEvent) {
        if self.dev_mode && event.is_degradation() {
            tracing::warn!(event = %event, "telemetry delivery degraded");
        } else {
            tracing::debug!(event = %event, "telemetry delivery");
        }
        emit_best_effort(self.sink.clone(), event).await;
    }
}
