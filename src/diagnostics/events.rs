use crate::error::FailureKind;
use crate::transport::StrategyKind;
use std::fmt;

/// Structured record of what the delivery engine did.
///
/// Failure classification lives here and nowhere else: the transport chain advances on any
/// failure, so these events are the only place the distinction between a blocked channel and a
/// rejecting collector is visible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryEvent {
    /// One strategy failed for one event; the chain moved on.
    StrategyFailed {
        /// Strategy that was attempted
        strategy: StrategyKind,
        /// Why it failed
        kind: FailureKind,
    },
    /// An event reached a collector (or was accepted for unload-safe transmission).
    Delivered {
        /// Strategy that succeeded
        via: StrategyKind,
    },
    /// Every network strategy failed and the event went to the durable queue.
    Persisted,
    /// A stored record was re-attempted by a flush pass.
    Retried {
        /// Store key of the record
        record_id: String,
        /// Whether this attempt delivered it
        delivered: bool,
    },
    /// Records removed by capacity pressure or retry exhaustion.
    Evicted {
        /// Number of records removed
        count: usize,
    },
    /// A flush pass finished.
    FlushCompleted {
        /// Records delivered and removed during the pass
        delivered: usize,
    },
    /// A blocker probe produced a fresh verdict.
    ProbeVerdict {
        /// Probed endpoint
        endpoint: String,
        /// Whether the endpoint looks blocked
        blocked: bool,
    },
}

impl DeliveryEvent {
    /// Events that describe something going wrong; dev mode logs these at warn.
    pub fn is_degradation(&self) -> bool {
        match self {
            Self::StrategyFailed { .. } | Self::Persisted | Self::Evicted { .. } => true,
            Self::Retried { delivered, .. } => !delivered,
            Self::ProbeVerdict { blocked, .. } => *blocked,
            Self::Delivered { .. } | Self::FlushCompleted { .. } => false,
        }
    }
}

impl fmt::Display for DeliveryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StrategyFailed { strategy, kind } => {
                write!(f, "StrategyFailed({}, {})", strategy, kind)
            }
            Self::Delivered { via } => write!(f, "Delivered(via={})", via),
            Self::Persisted => write!(f, "Persisted"),
            Self::Retried { record_id, delivered } => {
                write!(f, "Retried({}, delivered={})", record_id, delivered)
            }
            Self::Evicted { count } => write!(f, "Evicted({})", count),
            Self::FlushCompleted { delivered } => write!(f, "FlushCompleted(delivered={})", delivered),
            Self::ProbeVerdict { endpoint, blocked } => {
                write!(f, "ProbeVerdict({}, blocked={})", endpoint, blocked)
            }
        }
    }
}
