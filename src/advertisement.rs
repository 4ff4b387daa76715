//! Passive broadcast parsing.
//!
//! Plugs advertise continuously; their local name identifies the model
//! and the manufacturer-specific data carries live power state in its
//! last byte. Parsing never opens a connection, never blocks, and is
//! called once per received broadcast at broadcast arrival rate. State
//! writes are applied by the caller (see `PlugDevice::handle_advertisement`),
//! so this function is safe to run concurrently with an active session.

use crate::types::{DeviceIdentity, PlugModel};
use std::collections::HashMap;

/// A recognized plug broadcast: identity plus, when manufacturer data was
/// present, the per-port power state inferred from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPlug {
    pub identity: DeviceIdentity,
    /// One entry per port, in the model's port order. `None` when the
    /// broadcast carried no manufacturer data.
    pub port_states: Option<Vec<Option<bool>>>,
}

/// Parse a broadcast payload into identity and inferred power state.
///
/// Returns `None` when no local name is advertised or the name matches no
/// supported model prefix. Manufacturer data entries are applied in
/// iteration order, so the last non-empty vendor payload wins; empty
/// payloads are skipped.
pub fn parse_advertisement(
    address: &str,
    local_name: Option<&str>,
    manufacturer_data: &HashMap<u16, Vec<u8>>,
) -> Option<DiscoveredPlug> {
    let local_name = local_name?;
    let model = PlugModel::from_advertised_name(local_name)?;

    let identity = DeviceIdentity {
        address: address.to_string(),
        local_name: local_name.to_string(),
        model,
    };

    let mut port_states = None;
    for payload in manufacturer_data.values() {
        if let Some(last) = payload.last() {
            port_states = Some(model.decode_adv_state(*last));
        }
    }

    Some(DiscoveredPlug {
        identity,
        port_states,
    })
}
