//! Runtime error types.
//!
//! None of these abort the orchestrator. Transport failures surface as
//! `ConnectFailed` events; [`RuntimeError`] is only returned to API callers.

use thiserror::Error;

/// Errors raised by a [`crate::transport::WsTransport`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// The socket could not be opened.
    #[error("connect failed: {0}")]
    Connect(String),
    /// The connection request was malformed (bad URL or header).
    #[error("invalid connection request: {0}")]
    InvalidRequest(String),
    /// An open socket failed while reading or writing.
    #[error("socket error: {0}")]
    Socket(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Socket(err.to_string())
    }
}

/// Errors returned by the [`crate::orchestrator::WsOrchestrator`] handle.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The orchestrator task has stopped.
    #[error("orchestrator is not running")]
    Stopped,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_display() {
        let err = TransportError::Connect("connection refused".into());
        assert_eq!(err.to_string(), "connect failed: connection refused");
    }

    #[test]
    fn tungstenite_error_converts_to_socket() {
        let err: TransportError = tokio_tungstenite::tungstenite::Error::ConnectionClosed.into();
        assert!(matches!(err, TransportError::Socket(_)));
    }

    #[test]
    fn runtime_error_display() {
        assert_eq!(RuntimeError::Stopped.to_string(), "orchestrator is not running");
    }
}
