//! Error types for the MLLP listener.
//!
//! Framing and transport faults end a session silently. Classification and
//! persistence faults are folded into the acknowledgment instead, so they
//! only appear here as typed causes.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the MLLP engine.
#[derive(Debug, Error)]
pub enum MllpError {
    // ── Framing Errors ───────────────────────────────────────────
    /// The inbound envelope could not be trusted enough to acknowledge.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    // ── Transport Errors ─────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// A read exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Collaborator Errors ──────────────────────────────────────
    /// The audit store failed to persist a record.
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    // ── Session Errors ───────────────────────────────────────────
    /// A session attempted an invalid state transition.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// Invalid listener configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    // ── Pool Errors ──────────────────────────────────────────────
    /// Every worker is busy and the wait queue is full.
    #[error("worker pool saturated: {active} active, {queued} queued")]
    Saturated { active: usize, queued: usize },

    /// The worker pool was shut down.
    #[error("worker pool closed")]
    PoolClosed,
}

impl MllpError {
    /// Faults that originate from the socket itself. No acknowledgment is
    /// attempted after one of these.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }

    /// Faults in the inbound envelope.
    pub fn is_framing(&self) -> bool {
        matches!(self, Self::Framing(_))
    }

    /// Whether a best-effort error acknowledgment may still be written.
    pub fn allows_error_ack(&self) -> bool {
        !self.is_transport() && !self.is_framing()
    }
}

// ── FramingError ─────────────────────────────────────────────────

/// Ways an inbound MLLP envelope can be unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    /// The stream ended before any start block (0x0B) arrived.
    #[error("stream ended before a start block")]
    NoStartMarker,

    /// The stream ended after a start block but before the end block (0x1C).
    #[error("stream ended inside an unterminated frame")]
    IncompleteFrame,

    /// The frame grew beyond the configured limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
}

// ── PersistenceError ─────────────────────────────────────────────

/// A fault reported by an [`AuditStore`](crate::audit::AuditStore).
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The backing file or device failed.
    #[error("audit I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The record could not be serialized.
    #[error("audit encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The store refused the record.
    #[error("audit store unavailable: {0}")]
    Unavailable(String),
}

// ── ParseFault ───────────────────────────────────────────────────

/// A fault raised while extracting a header from message text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFault {
    /// The MSH segment does not declare a usable field separator.
    #[error("invalid field separator {0:?}")]
    InvalidFieldSeparator(char),

    /// The encoding-characters field is unusable.
    #[error("invalid encoding characters {0:?}")]
    InvalidEncodingCharacters(String),

    /// A pluggable parser failed for its own reasons.
    #[error("{0}")]
    Other(String),
}

impl From<String> for ParseFault {
    fn from(s: String) -> Self {
        ParseFault::Other(s)
    }
}

impl From<&str> for ParseFault {
    fn from(s: &str) -> Self {
        ParseFault::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = MllpError::from(FramingError::FrameTooLarge {
            size: 1000,
            max: 500,
        });
        assert!(e.to_string().contains("1000"));
        assert!(e.to_string().contains("500"));

        let e = MllpError::Persistence(PersistenceError::Unavailable("db down".into()));
        assert!(e.to_string().contains("db down"));
    }

    #[test]
    fn from_io_is_transport() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: MllpError = io_err.into();
        assert!(e.is_transport());
        assert!(!e.allows_error_ack());
    }

    #[test]
    fn framing_suppresses_ack() {
        let e: MllpError = FramingError::IncompleteFrame.into();
        assert!(e.is_framing());
        assert!(!e.allows_error_ack());
    }

    #[test]
    fn protocol_violation_allows_ack() {
        let e = MllpError::ProtocolViolation("bad transition");
        assert!(e.allows_error_ack());
    }

    #[test]
    fn parse_fault_from_str() {
        let f: ParseFault = "broken".into();
        assert!(matches!(f, ParseFault::Other(_)));
    }
}
