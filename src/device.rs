//! Per-device facade: model knowledge composed with the session engine.

use crate::advertisement::DiscoveredPlug;
use crate::error::{PlugError, PlugResult};
use crate::protocol::frame::{Frame, OP_SET_STATE};
use crate::supervisor::{SessionState, SessionSupervisor};
use crate::transport::PlugTransport;
use crate::types::{ConnectionPolicy, Credential, DeviceIdentity, PlugConfig, PlugModel};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// A paired smart plug: switch operations per port, cached power state,
/// and passive state updates from broadcasts.
///
/// State is only ever written on evidence, meaning a successful command
/// acknowledgement or a parsed broadcast; it is never set speculatively
/// on submission.
pub struct PlugDevice {
    identity: DeviceIdentity,
    supervisor: SessionSupervisor,
    /// One slot per port, `None` until the first observation.
    port_states: Mutex<Vec<Option<bool>>>,
}

impl std::fmt::Debug for PlugDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlugDevice")
            .field("identity", &self.identity)
            .field("port_states", &self.port_states)
            .finish_non_exhaustive()
    }
}

impl PlugDevice {
    /// Build a device facade from its identity and pairing credential.
    ///
    /// Credential validation happens here; command-time calls can no
    /// longer fail on configuration grounds except for an out-of-range
    /// port index.
    pub fn new(
        transport: Arc<dyn PlugTransport>,
        identity: DeviceIdentity,
        credential: Credential,
        policy: ConnectionPolicy,
    ) -> Self {
        let supervisor = SessionSupervisor::new(
            transport,
            identity.model.characteristics(),
            credential,
            policy,
            identity.to_string(),
        );
        let port_states = Mutex::new(vec![None; identity.model.port_count()]);
        Self {
            identity,
            supervisor,
            port_states,
        }
    }

    /// Build a device facade from persisted configuration.
    ///
    /// Fails fast on an unknown model tag or malformed access token:
    /// configuration-class errors surface at construction time, never at
    /// command time.
    pub fn from_config(transport: Arc<dyn PlugTransport>, config: &PlugConfig) -> PlugResult<Self> {
        let model: PlugModel = config.model.parse()?;
        let credential = Credential::from_hex(&config.access_token)?;
        let identity = DeviceIdentity {
            address: config.address.clone(),
            local_name: config
                .local_name
                .clone()
                .unwrap_or_else(|| config.address.clone()),
            model,
        };
        Ok(Self::new(transport, identity, credential, config.connection))
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn model(&self) -> PlugModel {
        self.identity.model
    }

    /// Port labels in port order: `(None, None)` for the single implicit
    /// port of one-outlet models.
    pub fn port_names(&self) -> Vec<(Option<u8>, Option<&'static str>)> {
        self.identity
            .model
            .ports()
            .iter()
            .map(|spec| (spec.index, spec.label))
            .collect()
    }

    /// Watch the session lifecycle of this device's command engine.
    pub fn subscribe_session_state(&self) -> watch::Receiver<SessionState> {
        self.supervisor.subscribe_state()
    }

    /// Cached power state for `port`; `None` until the first broadcast or
    /// confirmed command.
    pub fn is_on(&self, port: usize) -> Option<bool> {
        self.port_states.lock().get(port).copied().flatten()
    }

    /// Switch `port` on. Resolves once the device confirms (or the
    /// attempt definitively fails); only a confirmed command updates the
    /// cached state.
    pub async fn turn_on(&self, port: usize) -> PlugResult<bool> {
        self.switch(port, true).await
    }

    /// Switch `port` off. See [`PlugDevice::turn_on`].
    pub async fn turn_off(&self, port: usize) -> PlugResult<bool> {
        self.switch(port, false).await
    }

    async fn switch(&self, port: usize, on: bool) -> PlugResult<bool> {
        let payload = self
            .identity
            .model
            .switch_payload(port, on)
            .ok_or_else(|| {
                PlugError::Configuration(format!(
                    "model {} has no port {port}",
                    self.identity.model
                ))
            })?;
        let frame = Frame::command(OP_SET_STATE, &[payload])?;

        // A dropped completion handle means the engine went away while the
        // command was pending; report failure rather than erroring out.
        let confirmed = self.supervisor.submit(frame).await.unwrap_or(false);
        if confirmed {
            if let Some(slot) = self.port_states.lock().get_mut(port) {
                *slot = Some(on);
            }
        }
        Ok(confirmed)
    }

    /// Apply a parsed broadcast to the cached state.
    ///
    /// Touches only the state cache, so it may run fully concurrently
    /// with an active session. Broadcasts for other devices or models are
    /// ignored.
    pub fn handle_advertisement(&self, discovered: &DiscoveredPlug) {
        if discovered.identity.address != self.identity.address
            || discovered.identity.model != self.identity.model
        {
            return;
        }
        let Some(updates) = &discovered.port_states else {
            return;
        };

        debug!(device = %self.identity, states = ?updates, "applying broadcast state");
        let mut states = self.port_states.lock();
        for (slot, update) in states.iter_mut().zip(updates) {
            if update.is_some() {
                *slot = *update;
            }
        }
    }

    /// Stop the command engine: fail queued commands and tear down any
    /// active session.
    pub fn shutdown(&self) {
        self.supervisor.shutdown();
    }
}
