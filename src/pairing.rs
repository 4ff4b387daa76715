//! One-shot pairing flow: exchange a long-lived credential with a plug.
//!
//! Pairing is the only time a device hands out its key. The device will
//! answer the request with "not ready" until the user physically confirms
//! (presses the button on the plug), so the request is retransmitted on
//! every such response, without an upper bound; the caller abandons the
//! flow with [`Pairer::cancel`].

use crate::error::{PlugError, PlugResult};
use crate::protocol::frame::{Frame, InboundFrame, OP_PAIR};
use crate::transport::{PlugConnection, PlugTransport};
use crate::types::{DeviceIdentity, PlugModel};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Observable pairing flow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    Idle,
    Connecting,
    AwaitingCredential,
    Complete,
    Failed,
}

/// One pairing attempt against one device.
///
/// Exactly one `begin`/`finish` pair per instance; the flow is not
/// reentrant.
pub struct Pairer {
    transport: Arc<dyn PlugTransport>,
    identity: DeviceIdentity,
    state_tx: watch::Sender<PairingState>,
    cancel: CancellationToken,
    begun: bool,
    result: Option<oneshot::Receiver<String>>,
}

impl Pairer {
    pub fn new(transport: Arc<dyn PlugTransport>, identity: DeviceIdentity) -> Self {
        let (state_tx, _) = watch::channel(PairingState::Idle);
        Self {
            transport,
            identity,
            state_tx,
            cancel: CancellationToken::new(),
            begun: false,
            result: None,
        }
    }

    /// Watch pairing flow transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<PairingState> {
        self.state_tx.subscribe()
    }

    /// Connect, subscribe and send the credential request.
    ///
    /// Propagates a connection error if the transport cannot establish the
    /// link after its own retries; afterwards a background task answers
    /// device responses until the key arrives or the flow is abandoned.
    pub async fn begin(&mut self) -> PlugResult<()> {
        if self.begun {
            return Err(PlugError::InvalidState(
                "pairing already begun on this pairer".into(),
            ));
        }
        self.begun = true;

        info!(device = %self.identity, "connecting to begin pairing");
        self.state_tx.send_replace(PairingState::Connecting);

        let conn = match self.transport.connect().await {
            Ok(conn) => conn,
            Err(e) => {
                self.state_tx.send_replace(PairingState::Failed);
                return Err(e.into());
            }
        };

        let chars = self.identity.model.characteristics();
        let flow = async {
            let notifications = conn.subscribe(chars.recv).await?;
            send_credential_request(conn.as_ref(), self.identity.model).await?;
            Ok::<_, PlugError>(notifications)
        };
        let mut notifications = match flow.await {
            Ok(n) => n,
            Err(e) => {
                self.state_tx.send_replace(PairingState::Failed);
                teardown(conn.as_ref(), self.identity.model).await;
                return Err(e);
            }
        };

        self.state_tx.send_replace(PairingState::AwaitingCredential);

        let (result_tx, result_rx) = oneshot::channel();
        self.result = Some(result_rx);

        let identity = self.identity.clone();
        let cancel = self.cancel.clone();
        let state_tx = self.state_tx.clone();
        tokio::spawn(async move {
            // Resolved at most once; duplicate success notifications after
            // the first are never read because the loop exits.
            let mut credential: Option<String> = None;
            loop {
                let data = tokio::select! {
                    _ = cancel.cancelled() => break,
                    data = notifications.recv() => match data {
                        Some(data) => data,
                        // Link dropped before the key arrived.
                        None => break,
                    },
                };

                match InboundFrame::classify(&data) {
                    Some(InboundFrame::PairKeyGranted(key)) => {
                        info!(device = %identity, "received authentication key");
                        credential = Some(hex::encode(key));
                        break;
                    }
                    Some(InboundFrame::PairRetry) => {
                        debug!(device = %identity, "device not ready, re-requesting key");
                        if let Err(e) = send_credential_request(conn.as_ref(), identity.model).await
                        {
                            warn!(device = %identity, error = %e, "pairing retransmit failed");
                            break;
                        }
                    }
                    _ => {}
                }
            }

            state_tx.send_replace(if credential.is_some() {
                PairingState::Complete
            } else {
                PairingState::Failed
            });

            // Teardown precedes resolution so `finish` returns with the
            // link already released.
            teardown(conn.as_ref(), identity.model).await;
            if let Some(credential) = credential {
                let _ = result_tx.send(credential);
            }
        });

        Ok(())
    }

    /// Abandon the flow; `finish` will then yield `None`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Block until the flow resolves and the link is released.
    ///
    /// Returns the hex-encoded credential, or `None` if pairing ended
    /// without one (link dropped, flow cancelled). Notifications are torn
    /// down and the device disconnected before this returns.
    pub async fn finish(&mut self) -> PlugResult<Option<String>> {
        let result = self.result.take().ok_or_else(|| {
            PlugError::InvalidState("finish called before begin".into())
        })?;

        info!(device = %self.identity, "finishing pairing");
        Ok(result.await.ok())
    }
}

impl Drop for Pairer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn send_credential_request(
    conn: &dyn PlugConnection,
    model: PlugModel,
) -> PlugResult<()> {
    let chars = model.characteristics();
    let request = Frame::command(OP_PAIR, &[])?;
    conn.write(chars.send, request.as_bytes()).await?;
    Ok(())
}

/// Best-effort unsubscribe and disconnect; runs on every flow exit.
async fn teardown(conn: &dyn PlugConnection, model: PlugModel) {
    let chars = model.characteristics();
    if let Err(e) = conn.unsubscribe(chars.recv).await {
        debug!(error = %e, "pairing unsubscribe failed");
    }
    if let Err(e) = conn.disconnect().await {
        warn!(error = %e, "pairing disconnect failed");
    }
}
