//! Detection of hosts that sabotage outbound telemetry.
//!
//! A [`BlockerProbe`] combines two signals:
//! - an active check: one cheap reachability request per endpoint, bounded by the probe timeout.
//!   A network-layer failure or a timeout means *blocked*; any HTTP status, even 4xx/5xx, means the
//!   channel works.
//! - a passive heuristic: a bait element the host renders with markup that content blockers hide.
//!   The verdict is memoized and recomputed only after it goes stale, at most one frame wait at a
//!   time.
//!
//! Verdicts are cached per endpoint and dropped once older than the TTL.

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::diagnostics::{DeliveryEvent, Diagnostics};
use crate::error::TransportError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Which signal produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMethod {
    /// The reachability check.
    Network,
    /// The bait element heuristic.
    Bait,
    /// Neither signal was available.
    None,
}

/// Cached per-endpoint verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockerProbeResult {
    pub endpoint: String,
    pub is_blocked: bool,
    pub method: ProbeMethod,
    pub reason: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub checked_at: u64,
}

/// Low-cost request used to tell a refused connection from a working one.
#[async_trait]
pub trait Reachability: Send + Sync + std::fmt::Debug {
    /// Status of a HEAD-style request, or the network-layer error that prevented one.
    async fn check(&self, endpoint: &str) -> Result<u16, TransportError>;
}

/// Host side of the bait heuristic.
///
/// The host creates the bait element on first use and reuses it afterwards.
#[async_trait]
pub trait BaitHost: Send + Sync + std::fmt::Debug {
    /// Resolves after the next layout/frame boundary.
    async fn next_frame(&self);

    /// Whether external rules hid or collapsed the bait element.
    fn bait_collapsed(&self) -> bool;
}

#[derive(Debug, Clone, Copy)]
struct BaitMemo {
    collapsed: bool,
    checked_at: u64,
}

/// Cached blocker detection, one verdict per endpoint.
#[derive(Debug)]
pub struct BlockerProbe {
    reachability: Arc<dyn Reachability>,
    bait_host: Option<Arc<dyn BaitHost>>,
    clock: Arc<dyn Clock>,
    diagnostics: Diagnostics,
    ttl: Duration,
    timeout: Duration,
    cache: Mutex<HashMap<String, BlockerProbeResult>>,
    bait: Mutex<Option<BaitMemo>>,
    bait_scheduled: AtomicBool,
    refreshing: Mutex<HashSet<String>>,
}

impl BlockerProbe {
    pub fn new(reachability: Arc<dyn Reachability>, config: &EngineConfig) -> Self {
        Self {
            reachability,
            bait_host: None,
            clock: Arc::new(SystemClock),
            diagnostics: Diagnostics::null(),
            ttl: config.probe_ttl,
            timeout: config.probe_timeout,
            cache: Mutex::new(HashMap::new()),
            bait: Mutex::new(None),
            bait_scheduled: AtomicBool::new(false),
            refreshing: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_bait_host(mut self, host: Arc<dyn BaitHost>) -> Self {
        self.bait_host = Some(host);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Cached verdict for `endpoint`, or a fresh one if none is live.
    pub async fn detect(&self, endpoint: &str) -> BlockerProbeResult {
        if let Some(hit) = self.cached(endpoint) {
            return hit;
        }

        let result = self.probe(endpoint).await;
        lock(&self.cache).insert(endpoint.to_string(), result.clone());
        self.diagnostics
            .emit(DeliveryEvent::ProbeVerdict {
                endpoint: endpoint.to_string(),
                blocked: result.is_blocked,
            })
            .await;
        result
    }

    /// Live cached verdict; expired entries are removed on the way.
    pub fn cached(&self, endpoint: &str) -> Option<BlockerProbeResult> {
        let now = self.clock.now_millis();
        let ttl = duration_millis(self.ttl);
        let mut cache = lock(&self.cache);
        cache.retain(|_, result| now.saturating_sub(result.checked_at) < ttl);
        cache.get(endpoint).cloned()
    }

    /// Start a background [`BlockerProbe::detect`] unless one is already running for `endpoint`.
    ///
    /// Does nothing outside a tokio runtime.
    pub fn refresh_in_background(self: &Arc<Self>, endpoint: &str) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        if !lock(&self.refreshing).insert(endpoint.to_string()) {
            return;
        }
        let slot = RefreshSlot { probe: Arc::clone(self), endpoint: endpoint.to_string() };
        handle.spawn(async move {
            tokio::task::yield_now().await;
            slot.probe.detect(&slot.endpoint).await;
        });
    }

    async fn probe(&self, endpoint: &str) -> BlockerProbeResult {
        let (network_blocked, method, reason) =
            match tokio::time::timeout(self.timeout, self.reachability.check(endpoint)).await {
                Err(_) => (true, ProbeMethod::Network, Some("reachability check timed out".into())),
                Ok(Err(error)) if error.is_blocked() => {
                    (true, ProbeMethod::Network, Some(error.to_string()))
                }
                Ok(Err(error)) => {
                    tracing::debug!(endpoint, %error, "reachability check inconclusive");
                    (false, ProbeMethod::None, None)
                }
                Ok(Ok(_status)) => (false, ProbeMethod::Network, None),
            };

        let checked_at = self.clock.now_millis();
        if network_blocked {
            return BlockerProbeResult {
                endpoint: endpoint.to_string(),
                is_blocked: true,
                method,
                reason,
                checked_at,
            };
        }

        match self.bait_verdict().await {
            Some(true) => BlockerProbeResult {
                endpoint: endpoint.to_string(),
                is_blocked: true,
                method: ProbeMethod::Bait,
                reason: Some("bait element collapsed".into()),
                checked_at,
            },
            Some(false) if method == ProbeMethod::None => BlockerProbeResult {
                endpoint: endpoint.to_string(),
                is_blocked: false,
                method: ProbeMethod::Bait,
                reason: None,
                checked_at,
            },
            _ => BlockerProbeResult {
                endpoint: endpoint.to_string(),
                is_blocked: false,
                method,
                reason: None,
                checked_at,
            },
        }
    }

    /// Memoized bait verdict. Only one caller waits for a frame at a time; the others get the
    /// previous memo, which may be stale or absent.
    async fn bait_verdict(&self) -> Option<bool> {
        let host = self.bait_host.as_ref()?;
        let now = self.clock.now_millis();
        let memo = *lock(&self.bait);
        if let Some(memo) = memo {
            if now.saturating_sub(memo.checked_at) < duration_millis(self.ttl) {
                return Some(memo.collapsed);
            }
        }

        if self
            .bait_scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return memo.map(|m| m.collapsed);
        }

        host.next_frame().await;
        let collapsed = host.bait_collapsed();
        *lock(&self.bait) = Some(BaitMemo { collapsed, checked_at: self.clock.now_millis() });
        self.bait_scheduled.store(false, Ordering::Release);
        Some(collapsed)
    }
}

/// Marks a background refresh as running; the mark is cleared on drop, even if the task is
/// aborted or its runtime shuts down first.
struct RefreshSlot {
    probe: Arc<BlockerProbe>,
    endpoint: String,
}

impl Drop for RefreshSlot {
    fn drop(&mut self) {
        lock(&self.probe.refreshing).remove(&self.endpoint);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
