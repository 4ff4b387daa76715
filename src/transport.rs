//! Transport capability boundary.
//!
//! The protocol engine is agnostic to the underlying wireless stack: it
//! only requires the operations below, and treats a single `connect` call
//! as "retried enough, then give up"; concrete adapters are expected to
//! apply their own retry policy internally. A btleplug-backed adapter
//! ships behind the `btleplug` feature; tests provide scripted mocks.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

#[cfg(feature = "btleplug")]
mod btleplug;

#[cfg(feature = "btleplug")]
pub use self::btleplug::{default_adapter, discover_plugs, find_peripheral, BtleplugTransport};

/// Failures reported by a transport adapter.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The link could not be established, after the adapter's own retries.
    #[error("failed to connect after {attempts} attempt(s): {reason}")]
    ConnectFailed { attempts: u32, reason: String },
    /// The device does not expose the requested characteristic.
    #[error("characteristic {0} not found on device")]
    CharacteristicNotFound(Uuid),
    /// A characteristic write failed mid-session.
    #[error("write failed: {0}")]
    WriteFailed(String),
    /// Enabling notifications failed.
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),
    /// Disabling notifications failed.
    #[error("unsubscribe failed: {0}")]
    UnsubscribeFailed(String),
    /// Tearing the link down failed.
    #[error("disconnect failed: {0}")]
    DisconnectFailed(String),
    /// Passive scanning failed.
    #[error("scan failed: {0}")]
    ScanFailed(String),
}

/// A factory for connections to one physical device.
///
/// Implementations own addressing and platform details; the engine calls
/// `connect` once per session attempt.
#[async_trait]
pub trait PlugTransport: Send + Sync {
    /// Open a connection, retrying internally per the adapter's policy.
    async fn connect(&self) -> Result<Box<dyn PlugConnection>, TransportError>;
}

/// One live connection to a device.
///
/// The session supervisor is the sole owner of a connection and is solely
/// responsible for calling `disconnect` on every exit path.
#[async_trait]
pub trait PlugConnection: Send + Sync {
    /// Write `payload` to the given characteristic.
    async fn write(&self, characteristic: Uuid, payload: &[u8]) -> Result<(), TransportError>;

    /// Enable notifications on the given characteristic and return the
    /// stream of notification payloads.
    async fn subscribe(
        &self,
        characteristic: Uuid,
    ) -> Result<mpsc::UnboundedReceiver<Bytes>, TransportError>;

    /// Disable notifications on the given characteristic.
    async fn unsubscribe(&self, characteristic: Uuid) -> Result<(), TransportError>;

    /// Tear the link down.
    async fn disconnect(&self) -> Result<(), TransportError>;
}
