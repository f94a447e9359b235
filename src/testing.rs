//! Deterministic fakes for exercising the engine without a network or a disk.
//!
//! Compiled for this crate's tests and, behind the `testing` feature, for downstream suites.

use crate::blocker::{BaitHost, Reachability};
use crate::error::{StoreError, TransportError};
use crate::event::Event;
use crate::store::{QueueBackend, StoredRecord};
use crate::transport::{Receipt, Transport, TransportChain};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Fixed event whose kind is the only varying field.
pub fn sample_event(kind: &str) -> Event {
    Event::builder(kind, "test", "unit")
        .session_id("session_0_test")
        .captured_at(0)
        .source_page("/")
        .client_context("lastmile-test")
        .build()
}

#[derive(Debug)]
struct Script {
    queued: VecDeque<Result<Receipt, TransportError>>,
    fallback: Result<Receipt, TransportError>,
    events: Vec<Event>,
}

/// Transport that replays queued results, then repeats a fallback result forever.
///
/// Clones share the script and the call log.
#[derive(Debug, Clone)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
    endpoint: Option<String>,
}

impl ScriptedTransport {
    pub fn always(result: Result<Receipt, TransportError>) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                queued: VecDeque::new(),
                fallback: result,
                events: Vec::new(),
            })),
            endpoint: None,
        }
    }

    /// Answers every attempt with `200`.
    pub fn accepting() -> Self {
        Self::always(Ok(Receipt::Status(200)))
    }

    /// Answers every attempt with a network-layer failure.
    pub fn blocked() -> Self {
        Self::always(Err(TransportError::Blocked("connection refused".into())))
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Queue a one-off result ahead of the fallback.
    pub fn push(&self, result: Result<Receipt, TransportError>) {
        self.lock().queued.push_back(result);
    }

    pub fn set_fallback(&self, result: Result<Receipt, TransportError>) {
        self.lock().fallback = result;
    }

    pub fn calls(&self) -> usize {
        self.lock().events.len()
    }

    /// Every event attempted, in order.
    pub fn events(&self) -> Vec<Event> {
        self.lock().events.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn attempt(&self, event: &Event) -> Result<Receipt, TransportError> {
        let mut script = self.lock();
        script.events.push(event.clone());
        match script.queued.pop_front() {
            Some(result) => result,
            None => script.fallback.clone(),
        }
    }

    fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }
}

/// Transport whose attempts never resolve, like a black-holed connection.
#[derive(Debug, Clone, Default)]
pub struct StalledTransport {
    calls: Arc<AtomicUsize>,
}

impl StalledTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for StalledTransport {
    async fn attempt(&self, _event: &Event) -> Result<Receipt, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

/// Standard chain whose three network strategies all report a blocked connection.
pub fn blocked_chain() -> TransportChain {
    TransportChain::standard(
        Arc::new(ScriptedTransport::blocked()),
        Arc::new(ScriptedTransport::blocked()),
        Arc::new(ScriptedTransport::blocked()),
    )
}

/// Backend whose every operation fails with the same error.
#[derive(Debug, Clone)]
pub struct FailingBackend {
    error: StoreError,
}

impl FailingBackend {
    pub fn new(error: StoreError) -> Self {
        Self { error }
    }
}

#[async_trait]
impl QueueBackend for FailingBackend {
    async fn insert_capped(&self, _: StoredRecord, _: usize) -> Result<usize, StoreError> {
        Err(self.error.clone())
    }

    async fn list_eligible(&self, _: usize, _: u32) -> Result<Vec<StoredRecord>, StoreError> {
        Err(self.error.clone())
    }

    async fn increment_attempt(&self, _: &str, _: u64, _: u32) -> Result<bool, StoreError> {
        Err(self.error.clone())
    }

    async fn remove(&self, _: &str) -> Result<bool, StoreError> {
        Err(self.error.clone())
    }

    async fn remove_exhausted(&self, _: u32) -> Result<usize, StoreError> {
        Err(self.error.clone())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Err(self.error.clone())
    }
}

/// Reachability check with a settable answer; `None` never answers.
#[derive(Debug, Clone)]
pub struct FakeReachability {
    answer: Arc<Mutex<Option<Result<u16, TransportError>>>>,
    calls: Arc<AtomicUsize>,
}

impl FakeReachability {
    pub fn new(answer: Result<u16, TransportError>) -> Self {
        Self { answer: Arc::new(Mutex::new(Some(answer))), calls: Arc::new(AtomicUsize::new(0)) }
    }

    /// A check that hangs until the probe timeout fires.
    pub fn hanging() -> Self {
        Self { answer: Arc::new(Mutex::new(None)), calls: Arc::new(AtomicUsize::new(0)) }
    }

    pub fn set(&self, answer: Result<u16, TransportError>) {
        *self.answer.lock().unwrap_or_else(|e| e.into_inner()) = Some(answer);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Reachability for FakeReachability {
    async fn check(&self, _endpoint: &str) -> Result<u16, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let answer = self.answer.lock().unwrap_or_else(|e| e.into_inner()).clone();
        match answer {
            Some(answer) => answer,
            None => std::future::pending().await,
        }
    }
}

/// Bait host with a switchable verdict that counts frame waits.
#[derive(Debug, Clone)]
pub struct FakeBaitHost {
    collapsed: Arc<AtomicBool>,
    frames: Arc<AtomicUsize>,
}

impl FakeBaitHost {
    pub fn new(collapsed: bool) -> Self {
        Self { collapsed: Arc::new(AtomicBool::new(collapsed)), frames: Arc::new(AtomicUsize::new(0)) }
    }

    pub fn set_collapsed(&self, collapsed: bool) {
        self.collapsed.store(collapsed, Ordering::SeqCst);
    }

    pub fn frames(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BaitHost for FakeBaitHost {
    async fn next_frame(&self) {
        self.frames.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
    }

    fn bait_collapsed(&self) -> bool {
        self.collapsed.load(Ordering::SeqCst)
    }
}
