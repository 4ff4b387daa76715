//! Authenticated command exchange over a single live connection.
//!
//! A [`PlugSession`] owns the notification stream of one connection and
//! drives the serial write/acknowledge protocol on it: authenticate once,
//! then one command at a time. Lifecycle (who connects, when to drain,
//! when to disconnect) belongs to the supervisor; this type only speaks
//! the wire protocol and reports [`ProtocolError`].

use super::error::ProtocolError;
use super::frame::{Frame, InboundFrame, OP_AUTH};
use crate::transport::PlugConnection;
use crate::types::DeviceCharacteristics;
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::trace;

pub struct PlugSession<'a> {
    conn: &'a dyn PlugConnection,
    chars: DeviceCharacteristics,
    notifications: mpsc::UnboundedReceiver<Bytes>,
    ack_timeout: Duration,
}

impl<'a> PlugSession<'a> {
    /// Subscribe to notifications and authenticate with the device.
    ///
    /// The authentication frame is the credential key zero-padded into a
    /// standard command frame. Returns once the device acknowledges it;
    /// a device that never answers fails the session after `ack_timeout`
    /// instead of blocking it indefinitely.
    pub async fn establish(
        conn: &'a dyn PlugConnection,
        chars: DeviceCharacteristics,
        key: &[u8],
        ack_timeout: Duration,
    ) -> Result<PlugSession<'a>, ProtocolError> {
        let notifications = conn.subscribe(chars.recv).await?;

        let mut session = Self {
            conn,
            chars,
            notifications,
            ack_timeout,
        };

        let auth = Frame::command(OP_AUTH, key)?;
        session.conn.write(session.chars.send, auth.as_bytes()).await?;
        session
            .wait_for(|frame| matches!(frame, InboundFrame::AuthAck))
            .await?;

        Ok(session)
    }

    /// Write a command frame and wait for the device's acknowledgement.
    pub async fn send_command(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        self.conn.write(self.chars.send, frame.as_bytes()).await?;
        self.wait_for(|frame| matches!(frame, InboundFrame::CommandAck))
            .await
    }

    /// Read notifications until one classifies as the wanted frame.
    ///
    /// Unrelated and unrecognized frames are skipped; the link may deliver
    /// notifications for opcodes this engine does not model.
    async fn wait_for(&mut self, want: fn(&InboundFrame) -> bool) -> Result<(), ProtocolError> {
        loop {
            let data = tokio::time::timeout(self.ack_timeout, self.notifications.recv())
                .await
                .map_err(|_| ProtocolError::Timeout(self.ack_timeout))?
                .ok_or(ProtocolError::StreamClosed)?;

            match InboundFrame::classify(&data) {
                Some(frame) if want(&frame) => return Ok(()),
                Some(frame) => trace!(?frame, "skipping unrelated frame"),
                None => trace!(len = data.len(), "skipping unrecognized notification"),
            }
        }
    }
}
