use crate::error::PlugError;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Characteristic used for all outbound writes (auth, commands, pairing).
pub const SEND_CHARACTERISTIC: Uuid = Uuid::from_u128(0x00010203_0405_0607_0809_0a0b0c0d2b11);

/// Characteristic carrying all inbound notifications.
pub const RECV_CHARACTERISTIC: Uuid = Uuid::from_u128(0x00010203_0405_0607_0809_0a0b0c0d2b10);

/// The send/notify characteristic pair a session operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCharacteristics {
    pub send: Uuid,
    pub recv: Uuid,
}

/// One independently switchable output on a plug.
///
/// `index` is `None` for single-outlet models, which expose exactly one
/// implicit port addressed as port 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSpec {
    pub index: Option<u8>,
    pub label: Option<&'static str>,
    on_payload: u8,
    off_payload: u8,
}

impl PortSpec {
    const fn single(on_payload: u8, off_payload: u8) -> Self {
        Self {
            index: None,
            label: None,
            on_payload,
            off_payload,
        }
    }

    const fn indexed(index: u8, label: &'static str, on_payload: u8, off_payload: u8) -> Self {
        Self {
            index: Some(index),
            label: Some(label),
            on_payload,
            off_payload,
        }
    }
}

const H5080_PORTS: &[PortSpec] = &[PortSpec::single(0xFF, 0xF0)];

const H5082_PORTS: &[PortSpec] = &[
    PortSpec::indexed(0, "Left Power", 0x22, 0x20),
    PortSpec::indexed(1, "Right Power", 0x11, 0x10),
];

const H5086_PORTS: &[PortSpec] = &[PortSpec::single(0x01, 0x00)];

/// Closed registry of supported plug models.
///
/// Every per-model fact (advertised name prefix, port layout, switch
/// command payloads, advertisement state decoding) is resolved through
/// this enum exactly once at facade construction, never re-dispatched
/// per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlugModel {
    H5080,
    H5082,
    H5086,
}

impl PlugModel {
    /// All supported models, in registry order.
    pub const ALL: &'static [PlugModel] = &[PlugModel::H5080, PlugModel::H5082, PlugModel::H5086];

    /// Stable model tag, as stored in configuration.
    pub const fn as_str(&self) -> &'static str {
        match self {
            PlugModel::H5080 => "H5080",
            PlugModel::H5082 => "H5082",
            PlugModel::H5086 => "H5086",
        }
    }

    /// Advertised local-name prefix identifying this model.
    pub const fn name_prefix(&self) -> &'static str {
        match self {
            PlugModel::H5080 => "ihoment_H5080_",
            PlugModel::H5082 => "ihoment_H5082_",
            PlugModel::H5086 => "GVH5086",
        }
    }

    /// Resolve a model from an advertised local name.
    pub fn from_advertised_name(name: &str) -> Option<PlugModel> {
        Self::ALL
            .iter()
            .copied()
            .find(|model| name.starts_with(model.name_prefix()))
    }

    /// The model's port layout; single-outlet models expose one implicit port.
    pub const fn ports(&self) -> &'static [PortSpec] {
        match self {
            PlugModel::H5080 => H5080_PORTS,
            PlugModel::H5082 => H5082_PORTS,
            PlugModel::H5086 => H5086_PORTS,
        }
    }

    pub const fn port_count(&self) -> usize {
        self.ports().len()
    }

    /// Switch-command payload byte for `port`, or `None` when the port
    /// index is out of range for this model.
    pub fn switch_payload(&self, port: usize, on: bool) -> Option<u8> {
        self.ports().get(port).map(|spec| {
            if on {
                spec.on_payload
            } else {
                spec.off_payload
            }
        })
    }

    /// Decode per-port power state from the last byte of the
    /// manufacturer-specific advertisement data.
    ///
    /// Single-outlet models report on when the byte equals `0x01`; the
    /// dual-outlet H5082 packs the left outlet into bit `0x02` and the
    /// right outlet into bit `0x01`.
    pub fn decode_adv_state(&self, last_byte: u8) -> Vec<Option<bool>> {
        match self {
            PlugModel::H5080 | PlugModel::H5086 => vec![Some(last_byte == 0x01)],
            PlugModel::H5082 => vec![
                Some(last_byte & 0x02 == 0x02),
                Some(last_byte & 0x01 == 0x01),
            ],
        }
    }

    /// Characteristic pair used by this model.
    ///
    /// All currently supported models share one GATT layout; kept per-model
    /// so a future model with different characteristics stays a local change.
    pub const fn characteristics(&self) -> DeviceCharacteristics {
        DeviceCharacteristics {
            send: SEND_CHARACTERISTIC,
            recv: RECV_CHARACTERISTIC,
        }
    }
}

impl FromStr for PlugModel {
    type Err = PlugError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|model| model.as_str() == s)
            .ok_or_else(|| PlugError::Configuration(format!("unsupported model {s}")))
    }
}

impl fmt::Display for PlugModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable identity of an observed device.
///
/// The address is the only durable cross-session key; name and model are
/// captured from the advertisement that discovered the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub address: String,
    pub local_name: String,
    pub model: PlugModel,
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.local_name, self.address)
    }
}

/// Long-lived shared secret obtained once via pairing.
///
/// Stored as the lowercase hex string the pairing flow produces; decoded
/// and validated against the frame payload capacity at construction.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    key: Vec<u8>,
}

impl Credential {
    pub fn from_hex(token: &str) -> Result<Self, PlugError> {
        let key = hex::decode(token)
            .map_err(|e| PlugError::Configuration(format!("invalid access token: {e}")))?;
        if key.len() > crate::protocol::frame::PAYLOAD_LEN {
            return Err(PlugError::Configuration(format!(
                "access token too long: {} bytes",
                key.len()
            )));
        }
        Ok(Self { key })
    }

    pub fn key_bytes(&self) -> &[u8] {
        &self.key
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.key)
    }
}

impl fmt::Debug for Credential {
    /// Key material stays out of logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({} bytes)", self.key.len())
    }
}

/// Timeouts and retry configuration for connection sessions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionPolicy {
    /// Bound on the auth-ack and command-ack waits. Without it a
    /// non-responding device would block its session indefinitely.
    #[serde(default = "ConnectionPolicy::default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    /// How long a drained session lingers for new commands before
    /// disconnecting, to amortize the cost of a fresh connection.
    #[serde(default = "ConnectionPolicy::default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Connect retry policy applied by the transport adapter.
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        Self {
            ack_timeout_ms: Self::default_ack_timeout_ms(),
            idle_timeout_ms: Self::default_idle_timeout_ms(),
            retry: RetryPolicy::default(),
        }
    }
}

impl ConnectionPolicy {
    fn default_ack_timeout_ms() -> u64 {
        20_000
    }

    fn default_idle_timeout_ms() -> u64 {
        1_000
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms.max(1))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms.max(1))
    }
}

/// Persisted per-device configuration, as produced by the pairing flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlugConfig {
    /// Hardware address of the device.
    pub address: String,
    /// Advertised name captured at discovery time.
    #[serde(default)]
    pub local_name: Option<String>,
    /// Model tag, e.g. "H5082".
    pub model: String,
    /// Hex-encoded credential from pairing.
    pub access_token: String,
    /// Session timeouts and retry tuning.
    #[serde(default)]
    pub connection: ConnectionPolicy,
}
