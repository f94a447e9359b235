//! Convenient re-exports for embedding the engine.
pub use crate::{
    blocker::{BaitHost, Reachability},
    config::{EngineConfig, Endpoints},
    diagnostics::{DeliveryEvent, Diagnostics, LogSink, MemorySink},
    engine::{Engine, EngineBuilder},
    error::{StoreError, TransportError},
    event::Event,
    lifecycle::{Lifecycle, LifecycleSignal},
    store::QueueBackend,
    transport::{Receipt, Transport},
};
