//! Error types for transports, the durable store and configuration.
//!
//! None of these ever reach the capture layer: transport errors are recovered by falling
//! through to the next strategy, store errors degrade the store to a no-op, and configuration
//! errors surface only when the engine is built.
use std::fmt;

/// Diagnostic classification of a failed delivery attempt.
///
/// The classification never changes what the chain does next; it only feeds logging and
/// [`crate::diagnostics::DeliveryEvent::StrategyFailed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The connection was refused or aborted before any response arrived.
    Blocked,
    /// The channel worked but the collector answered with a non-success status.
    Rejected,
    /// The host does not provide the primitive this strategy needs.
    Unavailable,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocked => write!(f, "blocked"),
            Self::Rejected => write!(f, "rejected"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Failure of a single transport attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Network-layer failure (refused, reset, aborted, timed out).
    #[error("connection blocked: {0}")]
    Blocked(String),
    /// The collector answered with a non-2xx status.
    #[error("collector rejected payload with status {status}")]
    Rejected { status: u16 },
    /// The primitive is missing or has shut down.
    #[error("transport primitive unavailable in this host")]
    Unavailable,
    /// The event could not be turned into a request body.
    #[error("failed to encode event: {0}")]
    Encode(String),
}

impl TransportError {
    /// Map the error onto the diagnostic taxonomy.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Blocked(_) => FailureKind::Blocked,
            Self::Rejected { .. } | Self::Encode(_) => FailureKind::Rejected,
            Self::Unavailable => FailureKind::Unavailable,
        }
    }

    /// Check if this error came from the network layer rather than the collector.
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked(_))
    }
}

/// Failure of the persistent substrate behind the durable queue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The substrate could not be opened or has gone away.
    #[error("durable store unavailable: {0}")]
    Unavailable(String),
    /// The substrate refused a write for lack of space.
    #[error("durable store quota exceeded")]
    QuotaExceeded,
    /// A stored row could not be decoded.
    #[error("durable store corrupt: {0}")]
    Corrupt(String),
    /// Any other backend failure.
    #[error("durable store backend error: {0}")]
    Backend(String),
}

/// Errors produced while validating an [`crate::config::EngineConfig`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A count or duration that must be positive was zero.
    #[error("{field} must be > 0")]
    Zero { field: &'static str },
    /// An endpoint URL or path was empty.
    #[error("endpoint `{field}` must not be empty")]
    EmptyEndpoint { field: &'static str },
    /// The configuration document could not be parsed.
    #[error("invalid configuration document: {0}")]
    Parse(String),
}
