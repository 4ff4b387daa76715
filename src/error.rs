use crate::protocol::error::ProtocolError;
use crate::transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias used across the crate's public surface.
pub type PlugResult<T> = Result<T, PlugError>;

/// Crate-level error domain.
///
/// Command-local failures (a single send/ack cycle) are reported through
/// that command's completion handle and never through this type; errors
/// that reach callers here are configuration problems, connection
/// establishment failures or misuse of a one-shot flow.
#[derive(Debug, Error)]
pub enum PlugError {
    /// Unsupported model, malformed credential, out-of-range port.
    /// Fatal, surfaced immediately, never retried.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The transport could not establish or keep a link, after its own
    /// retry policy.
    #[error("connection error: {0}")]
    Connection(String),
    /// The device never sent an expected acknowledgement.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// A characteristic write failed mid-session.
    #[error("write failure: {0}")]
    Write(String),
    /// A one-shot flow was driven out of order (e.g. `begin` twice).
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// The operation was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,
}

impl From<ProtocolError> for PlugError {
    /// Map protocol-level errors into the crate's error domain.
    ///
    /// - Payload-size violations are configuration mistakes.
    /// - Acknowledgement timeouts keep their duration.
    /// - Write failures stay distinguishable from link loss so the
    ///   supervisor can apply its per-command failure policy.
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::PayloadTooLarge(_) => PlugError::Configuration(err.to_string()),
            ProtocolError::Timeout(d) => PlugError::Timeout(d),
            ProtocolError::StreamClosed => PlugError::Connection(err.to_string()),
            ProtocolError::Transport(TransportError::WriteFailed(msg)) => PlugError::Write(msg),
            ProtocolError::Transport(t) => PlugError::Connection(t.to_string()),
        }
    }
}

impl From<TransportError> for PlugError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::WriteFailed(msg) => PlugError::Write(msg),
            other => PlugError::Connection(other.to_string()),
        }
    }
}
