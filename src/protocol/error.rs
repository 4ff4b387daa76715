use crate::transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Protocol-level error type for the plug command/response exchange.
///
/// This error is used inside the protocol module only. It distinguishes
/// between codec/structural failures, timed-out acknowledgement waits and
/// transport-level failures so that higher layers can map them into their
/// own error domains as needed.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Command payload does not fit the fixed frame layout.
    #[error("command payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    /// The device never sent the expected acknowledgement frame.
    #[error("timed out after {0:?} waiting for device acknowledgement")]
    Timeout(Duration),
    /// The notification stream ended while an acknowledgement was pending.
    ///
    /// This usually means the link dropped between a write and its ack.
    #[error("notification stream closed")]
    StreamClosed,
    /// Failure reported by the underlying transport capability.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
