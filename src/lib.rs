//! Protocol engine for Govee BLE smart plugs (H5080, H5082, H5086).
//!
//! These battery-free plugs speak a proprietary 20-byte command/response
//! protocol over a BLE link that must be opened per request and can fail
//! mid-handshake. The hard part is not switching a relay; it is making
//! that operation reliable, serialized and observable: commands are
//! queued and drained serially against a single authenticated connection
//! session, while passive advertisement broadcasts keep power state
//! current without ever connecting.
//!
//! # Example
//!
//! ```ignore
//! use govee_ble_plug::{PlugConfig, PlugDevice};
//! use govee_ble_plug::transport::{default_adapter, find_peripheral, BtleplugTransport};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config: PlugConfig = serde_json::from_str(
//!         r#"{"address": "AA:BB:CC:DD:EE:FF", "model": "H5082",
//!             "accessToken": "000102030405060708090a0b0c0d0e0f"}"#,
//!     )?;
//!
//!     let adapter = default_adapter().await?;
//!     let peripheral = find_peripheral(&adapter, &config.address)
//!         .await?
//!         .ok_or("device not in range")?;
//!     let transport = Arc::new(BtleplugTransport::new(
//!         peripheral,
//!         config.connection.retry,
//!     ));
//!
//!     let plug = PlugDevice::from_config(transport, &config)?;
//!     plug.turn_on(0).await?;
//!     Ok(())
//! }
//! ```

pub mod advertisement;
mod device;
mod error;
mod pairing;
pub mod protocol;
mod retry;
mod supervisor;
pub mod transport;
mod types;

pub use advertisement::{parse_advertisement, DiscoveredPlug};
pub use device::PlugDevice;
pub use error::{PlugError, PlugResult};
pub use pairing::{Pairer, PairingState};
pub use retry::RetryPolicy;
pub use supervisor::{SessionState, SessionSupervisor};
pub use types::{
    ConnectionPolicy, Credential, DeviceCharacteristics, DeviceIdentity, PlugConfig, PlugModel,
    PortSpec,
};
