//! Ordered delivery strategies with automatic fallthrough.
//!
//! A [`TransportChain`] is a tagged list of [`StrategyDescriptor`]s. Each delivery walks the list
//! until one strategy's success predicate accepts the [`Receipt`]. Any failure advances the
//! chain; the [`FailureKind`] of each failure is recorded for diagnostics only.
//!
//! The per-call order is derived, never stored:
//! 1. strategies whose endpoint has a cached *blocked* verdict move behind the others;
//! 2. the strategy that last succeeded moves to the front.
//!
//! Nothing is ever skipped in [`DeliveryMode::Normal`]. In [`DeliveryMode::Unloading`] only
//! unload-safe strategies run. Each attempt is bounded by the attempt timeout; a stalled
//! transport is abandoned and treated like a refused connection.

use crate::blocker::BlockerProbe;
use crate::config::REQUEST_TIMEOUT;
use crate::diagnostics::{DeliveryEvent, Diagnostics};
use crate::error::{FailureKind, TransportError};
use crate::event::Event;
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const NO_HINT: usize = usize::MAX;

/// What a transport primitive reported back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receipt {
    /// An HTTP response arrived with this status.
    Status(u16),
    /// A fire-and-forget primitive reported whether it took the payload.
    Queued(bool),
}

impl Receipt {
    /// Any 2xx status, or a payload the primitive accepted.
    pub fn is_accepted(&self) -> bool {
        match self {
            Self::Status(status) => (200..300).contains(status),
            Self::Queued(accepted) => *accepted,
        }
    }

    fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Status(_) => FailureKind::Rejected,
            Self::Queued(_) => FailureKind::Unavailable,
        }
    }
}

/// One concrete way to get an event to a collector.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    async fn attempt(&self, event: &Event) -> Result<Receipt, TransportError>;

    /// URL this transport talks to, used to look up blocker verdicts.
    fn endpoint(&self) -> Option<&str> {
        None
    }
}

/// Stand-in for a primitive the host does not provide.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unsupported;

#[async_trait]
impl Transport for Unsupported {
    async fn attempt(&self, _event: &Event) -> Result<Receipt, TransportError> {
        Err(TransportError::Unavailable)
    }
}

/// Name of a delivery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    AlternateEndpoint,
    Beacon,
    CanonicalEndpoint,
    /// Terminal step: the durable queue. Never part of a [`TransportChain`].
    DurableQueue,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AlternateEndpoint => "alternate_endpoint",
            Self::Beacon => "beacon",
            Self::CanonicalEndpoint => "canonical_endpoint",
            Self::DurableQueue => "durable_queue",
        };
        f.write_str(name)
    }
}

/// How a delivery is being made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    #[default]
    Normal,
    /// The host is tearing down; only unload-safe strategies are worth starting.
    Unloading,
}

/// A strategy entry: its name, how to attempt it and how to judge the result.
#[derive(Clone)]
pub struct StrategyDescriptor {
    pub kind: StrategyKind,
    pub transport: Arc<dyn Transport>,
    pub accepts: fn(&Receipt) -> bool,
    pub unload_safe: bool,
}

impl StrategyDescriptor {
    /// Ordinary request/response strategy; success is a 2xx status.
    pub fn network(kind: StrategyKind, transport: Arc<dyn Transport>) -> Self {
        Self { kind, transport, accepts: Receipt::is_accepted, unload_safe: false }
    }

    /// Fire-and-forget strategy that keeps working while the host unloads.
    pub fn beacon(transport: Arc<dyn Transport>) -> Self {
        Self { kind: StrategyKind::Beacon, transport, accepts: Receipt::is_accepted, unload_safe: true }
    }
}

impl fmt::Debug for StrategyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyDescriptor")
            .field("kind", &self.kind)
            .field("transport", &self.transport)
            .field("unload_safe", &self.unload_safe)
            .finish()
    }
}

/// Result of walking the chain for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: bool,
    pub via: Option<StrategyKind>,
    /// Every strategy that failed before the chain stopped, in attempt order.
    pub failures: Vec<(StrategyKind, FailureKind)>,
}

impl DeliveryReport {
    /// Whether any strategy actually got the event onto a channel, successfully or not.
    ///
    /// False when no strategy was eligible or every one was unavailable.
    pub fn reached_transport(&self) -> bool {
        self.delivered || self.failures.iter().any(|(_, kind)| *kind != FailureKind::Unavailable)
    }
}

/// Ordered network strategies for a single event.
#[derive(Debug)]
pub struct TransportChain {
    strategies: Vec<StrategyDescriptor>,
    last_success: AtomicUsize,
    probe: Option<Arc<BlockerProbe>>,
    diagnostics: Diagnostics,
    attempt_timeout: Duration,
}

impl TransportChain {
    pub fn new(strategies: Vec<StrategyDescriptor>) -> Self {
        Self {
            strategies,
            last_success: AtomicUsize::new(NO_HINT),
            probe: None,
            diagnostics: Diagnostics::null(),
            attempt_timeout: REQUEST_TIMEOUT,
        }
    }

    /// Alternate endpoint, then the unload-safe beacon, then the canonical endpoint.
    pub fn standard(
        alternate: Arc<dyn Transport>,
        beacon: Arc<dyn Transport>,
        canonical: Arc<dyn Transport>,
    ) -> Self {
        Self::new(vec![
            StrategyDescriptor::network(StrategyKind::AlternateEndpoint, alternate),
            StrategyDescriptor::beacon(beacon),
            StrategyDescriptor::network(StrategyKind::CanonicalEndpoint, canonical),
        ])
    }

    /// Bias ordering with the probe's cached verdicts and refresh stale ones in the background.
    pub fn with_probe(mut self, probe: Arc<BlockerProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// An attempt still pending after `timeout` is abandoned and counted as blocked.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn strategies(&self) -> &[StrategyDescriptor] {
        &self.strategies
    }

    /// Strategy that succeeded most recently, if any.
    pub fn hint(&self) -> Option<StrategyKind> {
        let index = self.last_success.load(Ordering::Relaxed);
        self.strategies.get(index).map(|s| s.kind)
    }

    pub async fn deliver(&self, event: &Event) -> DeliveryReport {
        self.deliver_with(event, DeliveryMode::Normal).await
    }

    pub async fn deliver_with(&self, event: &Event, mode: DeliveryMode) -> DeliveryReport {
        let mut failures = Vec::new();
        for index in self.attempt_order(mode) {
            let strategy = &self.strategies[index];
            let attempt = tokio::time::timeout(self.attempt_timeout, strategy.transport.attempt(event))
                .await
                .unwrap_or_else(|_| Err(TransportError::Blocked("transport attempt timed out".into())));
            let failure = match attempt {
                Ok(receipt) if (strategy.accepts)(&receipt) => {
                    self.last_success.store(index, Ordering::Relaxed);
                    self.diagnostics.emit(DeliveryEvent::Delivered { via: strategy.kind }).await;
                    return DeliveryReport { delivered: true, via: Some(strategy.kind), failures };
                }
                Ok(receipt) => receipt.failure_kind(),
                Err(error) => {
                    tracing::debug!(strategy = %strategy.kind, %error, "transport attempt failed");
                    error.kind()
                }
            };
            failures.push((strategy.kind, failure));
            self.diagnostics
                .emit(DeliveryEvent::StrategyFailed { strategy: strategy.kind, kind: failure })
                .await;
        }
        DeliveryReport { delivered: false, via: None, failures }
    }

    fn attempt_order(&self, mode: DeliveryMode) -> Vec<usize> {
        let eligible = self
            .strategies
            .iter()
            .enumerate()
            .filter(|(_, s)| mode == DeliveryMode::Normal || s.unload_safe)
            .map(|(index, _)| index);

        let (mut order, demoted): (Vec<usize>, Vec<usize>) =
            eligible.partition(|&index| !self.looks_blocked(index));
        order.extend(demoted);

        let hint = self.last_success.load(Ordering::Relaxed);
        if let Some(position) = order.iter().position(|&index| index == hint) {
            order[..=position].rotate_right(1);
        }
        order
    }

    fn looks_blocked(&self, index: usize) -> bool {
        let (Some(probe), Some(endpoint)) =
            (&self.probe, self.strategies[index].transport.endpoint())
        else {
            return false;
        };
        match probe.cached(endpoint) {
            Some(verdict) => verdict.is_blocked,
            None => {
                probe.refresh_in_background(endpoint);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemorySink;
    use crate::testing::{sample_event, ScriptedTransport, StalledTransport};

    fn chain_of(
        alternate: &ScriptedTransport,
        beacon: &ScriptedTransport,
        canonical: &ScriptedTransport,
    ) -> TransportChain {
        TransportChain::standard(
            Arc::new(alternate.clone()),
            Arc::new(beacon.clone()),
            Arc::new(canonical.clone()),
        )
    }

    #[tokio::test]
    async fn healthy_alternate_endpoint_wins_first() {
        let alternate = ScriptedTransport::accepting();
        let beacon = ScriptedTransport::accepting();
        let canonical = ScriptedTransport::accepting();
        let chain = chain_of(&alternate, &beacon, &canonical);

        let report = chain.deliver(&sample_event("e1")).await;

        assert!(report.delivered);
        assert_eq!(report.via, Some(StrategyKind::AlternateEndpoint));
        assert!(report.failures.is_empty());
        assert_eq!((alternate.calls(), beacon.calls(), canonical.calls()), (1, 0, 0));
    }

    #[tokio::test]
    async fn every_failure_class_advances_the_chain() {
        let alternate = ScriptedTransport::always(Err(TransportError::Blocked("refused".into())));
        let beacon = ScriptedTransport::always(Err(TransportError::Unavailable));
        let canonical = ScriptedTransport::always(Ok(Receipt::Status(503)));
        let sink = MemorySink::new();
        let chain = chain_of(&alternate, &beacon, &canonical)
            .with_diagnostics(Diagnostics::new(sink.clone()));

        let report = chain.deliver(&sample_event("e2")).await;

        assert!(!report.delivered);
        assert_eq!(
            report.failures,
            vec![
                (StrategyKind::AlternateEndpoint, FailureKind::Blocked),
                (StrategyKind::Beacon, FailureKind::Unavailable),
                (StrategyKind::CanonicalEndpoint, FailureKind::Rejected),
            ]
        );
        assert_eq!(sink.len(), 3);
    }

    #[tokio::test]
    async fn refused_beacon_payload_is_a_failure() {
        let alternate = ScriptedTransport::always(Err(TransportError::Blocked("reset".into())));
        let beacon = ScriptedTransport::always(Ok(Receipt::Queued(false)));
        let canonical = ScriptedTransport::accepting();
        let chain = chain_of(&alternate, &beacon, &canonical);

        let report = chain.deliver(&sample_event("e")).await;
        assert_eq!(report.via, Some(StrategyKind::CanonicalEndpoint));
        assert_eq!(report.failures[1], (StrategyKind::Beacon, FailureKind::Unavailable));
    }

    #[tokio::test]
    async fn last_success_is_tried_first_but_never_exclusive() {
        let alternate = ScriptedTransport::always(Err(TransportError::Blocked("refused".into())));
        let beacon = ScriptedTransport::accepting();
        let canonical = ScriptedTransport::accepting();
        let chain = chain_of(&alternate, &beacon, &canonical);

        chain.deliver(&sample_event("a")).await;
        assert_eq!(chain.hint(), Some(StrategyKind::Beacon));
        assert_eq!(alternate.calls(), 1);

        let report = chain.deliver(&sample_event("b")).await;
        assert_eq!(report.via, Some(StrategyKind::Beacon));
        assert_eq!(alternate.calls(), 1, "hinted strategy goes first");

        beacon.push(Err(TransportError::Blocked("gone".into())));
        let report = chain.deliver(&sample_event("c")).await;
        assert_eq!(
            report.failures,
            vec![
                (StrategyKind::Beacon, FailureKind::Blocked),
                (StrategyKind::AlternateEndpoint, FailureKind::Blocked),
            ]
        );
        assert_eq!(report.via, Some(StrategyKind::CanonicalEndpoint));
    }

    #[tokio::test]
    async fn unloading_mode_only_uses_unload_safe_strategies() {
        let alternate = ScriptedTransport::accepting();
        let beacon = ScriptedTransport::accepting();
        let canonical = ScriptedTransport::accepting();
        let chain = chain_of(&alternate, &beacon, &canonical);

        let report = chain.deliver_with(&sample_event("e"), DeliveryMode::Unloading).await;

        assert_eq!(report.via, Some(StrategyKind::Beacon));
        assert_eq!(alternate.calls(), 0);
    }

    #[tokio::test]
    async fn unloading_without_beacon_reports_undelivered() {
        let chain = TransportChain::new(vec![StrategyDescriptor::network(
            StrategyKind::AlternateEndpoint,
            Arc::new(ScriptedTransport::accepting()),
        )]);
        let report = chain.deliver_with(&sample_event("e"), DeliveryMode::Unloading).await;
        assert!(!report.delivered);
        assert!(report.failures.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_attempt_times_out_as_blocked() {
        let stalled = StalledTransport::new();
        let canonical = ScriptedTransport::accepting();
        let chain = TransportChain::standard(
            Arc::new(stalled.clone()),
            Arc::new(Unsupported),
            Arc::new(canonical.clone()),
        )
        .with_attempt_timeout(Duration::from_secs(2));

        let started = tokio::time::Instant::now();
        let report = chain.deliver(&sample_event("e")).await;

        assert_eq!(report.via, Some(StrategyKind::CanonicalEndpoint));
        assert_eq!(report.failures[0], (StrategyKind::AlternateEndpoint, FailureKind::Blocked));
        assert_eq!(stalled.calls(), 1);
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[test]
    fn report_without_channel_attempts_did_not_reach_transport() {
        let none = DeliveryReport { delivered: false, via: None, failures: vec![] };
        let unavailable = DeliveryReport {
            delivered: false,
            via: None,
            failures: vec![(StrategyKind::Beacon, FailureKind::Unavailable)],
        };
        let blocked = DeliveryReport {
            delivered: false,
            via: None,
            failures: vec![
                (StrategyKind::Beacon, FailureKind::Unavailable),
                (StrategyKind::CanonicalEndpoint, FailureKind::Blocked),
            ],
        };
        assert!(!none.reached_transport());
        assert!(!unavailable.reached_transport());
        assert!(blocked.reached_transport());
    }

    #[tokio::test]
    async fn unsupported_primitive_is_unavailable() {
        let err = Unsupported.attempt(&sample_event("e")).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Unavailable);
        assert_eq!(Unsupported.endpoint(), None);
    }

    #[test]
    fn receipts_accept_only_success() {
        assert!(Receipt::Status(204).is_accepted());
        assert!(!Receipt::Status(302).is_accepted());
        assert!(!Receipt::Status(404).is_accepted());
        assert!(Receipt::Queued(true).is_accepted());
        assert!(!Receipt::Queued(false).is_accepted());
    }
}
