#![allow(dead_code)]

//! Shared integration-test fixtures: tracing initialization and a
//! scripted mock transport that behaves like a plug on the other side of
//! the link.

use async_trait::async_trait;
use bytes::Bytes;
use govee_ble_plug::protocol::frame::{Frame, OP_AUTH, OP_PAIR, OP_SET_STATE};
use govee_ble_plug::transport::{PlugConnection, PlugTransport, TransportError};
use govee_ble_plug::{ConnectionPolicy, RetryPolicy};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::Level;

/// Global one-time tracing initialization guard for integration tests.
static INIT_TRACING: Once = Once::new();

/// Install a compact `tracing` subscriber so session lifecycle and
/// reconnect paths are visible in test output.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_target(false)
            .without_time()
            .try_init();
    });
}

/// A connection policy with short timeouts for paused-clock tests.
pub fn test_policy() -> ConnectionPolicy {
    ConnectionPolicy {
        ack_timeout_ms: 200,
        idle_timeout_ms: 50,
        retry: RetryPolicy::no_retry(),
    }
}

/// Scripted behavior of the simulated device.
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Fail this many connect calls before accepting one.
    pub connect_failures: u32,
    /// Whether the device acknowledges the authentication frame.
    pub auth_response: bool,
    /// 1-based index of the switch-command write that fails, counted
    /// across the device's lifetime.
    pub fail_write_at: Option<u32>,
    /// Whether the device answers pairing requests at all.
    pub pair_response: bool,
    /// Number of not-ready responses before the key is granted.
    pub pair_retries: u32,
    /// Key embedded in the granting pair response.
    pub pair_key: [u8; 16],
    /// Simulated teardown latency, for commands racing a closing session.
    pub disconnect_delay: Option<Duration>,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            connect_failures: 0,
            auth_response: true,
            fail_write_at: None,
            pair_response: true,
            pair_retries: 0,
            pair_key: *b"\x00\x01\x02\x03\x04\x05\x06\x07\x08\x09\x0a\x0b\x0c\x0d\x0e\x0f",
            disconnect_delay: None,
        }
    }
}

/// Counters and write log shared between the transport and its connections.
pub struct MockState {
    behavior: MockBehavior,
    pub connect_attempts: AtomicU32,
    pub disconnects: AtomicU32,
    command_writes: AtomicU32,
    pair_nacks_sent: AtomicU32,
    /// Every frame written to the device, across all sessions.
    pub written: Mutex<Vec<Vec<u8>>>,
}

impl MockState {
    /// Payload bytes of every switch command the device received.
    pub fn switch_payloads(&self) -> Vec<u8> {
        self.written
            .lock()
            .unwrap()
            .iter()
            .filter(|frame| frame.len() >= 3 && frame[0] == 0x33 && frame[1] == 0x01)
            .map(|frame| frame[2])
            .collect()
    }

    /// Number of pairing requests the device received.
    pub fn pair_requests(&self) -> usize {
        self.written
            .lock()
            .unwrap()
            .iter()
            .filter(|frame| frame.len() >= 2 && frame[0] == 0xAA && frame[1] == 0xB1)
            .count()
    }
}

/// Mock transport handing out scripted connections.
pub struct MockTransport {
    pub state: Arc<MockState>,
}

impl MockTransport {
    pub fn new(behavior: MockBehavior) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(MockState {
                behavior,
                connect_attempts: AtomicU32::new(0),
                disconnects: AtomicU32::new(0),
                command_writes: AtomicU32::new(0),
                pair_nacks_sent: AtomicU32::new(0),
                written: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn healthy() -> Arc<Self> {
        Self::new(MockBehavior::default())
    }
}

#[async_trait]
impl PlugTransport for MockTransport {
    async fn connect(&self) -> Result<Box<dyn PlugConnection>, TransportError> {
        let attempt = self.state.connect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.state.behavior.connect_failures {
            return Err(TransportError::ConnectFailed {
                attempts: 1,
                reason: "mock device unreachable".into(),
            });
        }
        Ok(Box::new(MockConnection {
            state: Arc::clone(&self.state),
            notify_tx: Mutex::new(None),
        }))
    }
}

struct MockConnection {
    state: Arc<MockState>,
    notify_tx: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
}

impl MockConnection {
    fn notify(&self, frame: Frame) {
        if let Some(tx) = self.notify_tx.lock().unwrap().as_ref() {
            let _ = tx.send(Bytes::copy_from_slice(frame.as_bytes()));
        }
    }
}

#[async_trait]
impl PlugConnection for MockConnection {
    async fn write(&self, _characteristic: uuid::Uuid, payload: &[u8]) -> Result<(), TransportError> {
        self.state.written.lock().unwrap().push(payload.to_vec());
        if payload.len() < 2 {
            return Ok(());
        }

        match (payload[0], payload[1]) {
            (0x33, 0xB2) => {
                if self.state.behavior.auth_response {
                    self.notify(Frame::command(OP_AUTH, &[]).unwrap());
                }
                Ok(())
            }
            (0x33, 0x01) => {
                let nth = self.state.command_writes.fetch_add(1, Ordering::SeqCst) + 1;
                if self.state.behavior.fail_write_at == Some(nth) {
                    return Err(TransportError::WriteFailed("mock write refused".into()));
                }
                self.notify(Frame::command(OP_SET_STATE, &[]).unwrap());
                Ok(())
            }
            (0xAA, 0xB1) => {
                if !self.state.behavior.pair_response {
                    return Ok(());
                }
                let nacks = self.state.pair_nacks_sent.load(Ordering::SeqCst);
                if nacks < self.state.behavior.pair_retries {
                    self.state.pair_nacks_sent.fetch_add(1, Ordering::SeqCst);
                    self.notify(Frame::command(OP_PAIR, &[0x00]).unwrap());
                } else {
                    let mut granted = vec![0x01];
                    granted.extend_from_slice(&self.state.behavior.pair_key);
                    self.notify(Frame::command(OP_PAIR, &granted).unwrap());
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn subscribe(
        &self,
        _characteristic: uuid::Uuid,
    ) -> Result<mpsc::UnboundedReceiver<Bytes>, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.notify_tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn unsubscribe(&self, _characteristic: uuid::Uuid) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if let Some(delay) = self.state.behavior.disconnect_delay {
            tokio::time::sleep(delay).await;
        }
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
