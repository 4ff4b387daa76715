//! Command queue and connection session lifecycle.
//!
//! Callers submit command frames at any time and receive a completion
//! handle; submission never blocks and never requires an open link. The
//! queue's empty-to-non-empty transition triggers a session task that
//! connects, authenticates, drains commands serially against the single
//! physical connection, lingers briefly for late arrivals, and tears the
//! link down, restarting itself when new work arrived during teardown.
//!
//! At most one session is active per device at any time; the flag that
//! enforces this lives under the same lock as the queue, so the
//! check-and-spawn in `submit` and the drain-and-stop at session end can
//! never race each other into a second session.

use crate::error::PlugError;
use crate::protocol::frame::Frame;
use crate::protocol::session::PlugSession;
use crate::transport::{PlugConnection, PlugTransport};
use crate::types::{ConnectionPolicy, Credential, DeviceCharacteristics};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{oneshot, watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Observable lifecycle of the connection session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoSession,
    Connecting,
    Authenticating,
    Draining,
    Closing,
}

/// A queued command frame plus its completion handle.
struct PendingCommand {
    frame: Frame,
    done: oneshot::Sender<bool>,
}

impl PendingCommand {
    fn resolve(self, ok: bool) {
        // The receiver may have been dropped by an impatient caller.
        let _ = self.done.send(ok);
    }
}

struct QueueState {
    pending: VecDeque<PendingCommand>,
    session_active: bool,
}

/// How a session attempt ended, for the failure policy in `run_session`.
enum SessionAbort {
    /// Failure before any command was attempted (subscribe, authenticate).
    /// The whole batch is failed, like a connect failure; retrying it
    /// against an unresponsive device would loop forever.
    Setup(PlugError),
    /// Failure while a specific command was in flight. That command is
    /// already resolved; unattempted ones are re-queued for the next
    /// session attempt.
    Drain(PlugError),
    /// The supervisor was shut down mid-session.
    Cancelled,
}

/// Owns the command queue and at most one live session task.
pub struct SessionSupervisor {
    inner: Arc<SupervisorInner>,
}

struct SupervisorInner {
    transport: Arc<dyn PlugTransport>,
    chars: DeviceCharacteristics,
    credential: Credential,
    policy: ConnectionPolicy,
    /// Device label for log correlation.
    label: String,
    queue: Mutex<QueueState>,
    /// Woken on every submit so an idle-draining session picks new work up.
    wakeup: Notify,
    state_tx: watch::Sender<SessionState>,
    cancel: CancellationToken,
}

impl SessionSupervisor {
    pub fn new(
        transport: Arc<dyn PlugTransport>,
        chars: DeviceCharacteristics,
        credential: Credential,
        policy: ConnectionPolicy,
        label: String,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::NoSession);
        Self {
            inner: Arc::new(SupervisorInner {
                transport,
                chars,
                credential,
                policy,
                label,
                queue: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    session_active: false,
                }),
                wakeup: Notify::new(),
                state_tx,
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Watch session lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    /// Queue a command frame for delivery.
    ///
    /// Never blocks. The returned handle resolves `true` once the device
    /// acknowledged the command, `false` on any failure; a closed handle
    /// (supervisor dropped mid-flight) should be read as failure. Starts
    /// a session task when none is active.
    pub fn submit(&self, frame: Frame) -> oneshot::Receiver<bool> {
        let (done, rx) = oneshot::channel();
        let cmd = PendingCommand { frame, done };

        if self.inner.cancel.is_cancelled() {
            cmd.resolve(false);
            return rx;
        }

        let start_session = {
            let mut queue = self.inner.queue.lock();
            queue.pending.push_back(cmd);
            if queue.session_active {
                false
            } else {
                queue.session_active = true;
                true
            }
        };
        self.inner.wakeup.notify_one();

        if start_session {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.run().await });
        }

        rx
    }

    /// Stop accepting work and fail everything still queued.
    ///
    /// An active session observes the cancellation at its next suspension
    /// point, resolves its admitted commands `false` and still runs the
    /// disconnect teardown.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.wakeup.notify_one();

        let leftovers: Vec<PendingCommand> = {
            let mut queue = self.inner.queue.lock();
            if queue.session_active {
                // The session task drains the queue on its way out.
                Vec::new()
            } else {
                queue.pending.drain(..).collect()
            }
        };
        for cmd in leftovers {
            cmd.resolve(false);
        }
    }
}

impl Drop for SessionSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl SupervisorInner {
    /// Session task body: run sessions until the queue stays empty.
    async fn run(self: Arc<Self>) {
        loop {
            self.run_session().await;

            // Done-callback reconciliation: commands that arrived during
            // teardown immediately re-trigger a session instead of
            // stranding in the queue.
            let mut queue = self.queue.lock();
            if self.cancel.is_cancelled() {
                let leftovers: Vec<PendingCommand> = queue.pending.drain(..).collect();
                queue.session_active = false;
                drop(queue);
                for cmd in leftovers {
                    cmd.resolve(false);
                }
                break;
            }
            if queue.pending.is_empty() {
                queue.session_active = false;
                break;
            }
            drop(queue);
            debug!(device = %self.label, "commands arrived during teardown, restarting session");
        }
        self.state_tx.send_replace(SessionState::NoSession);
    }

    /// One full connect-authenticate-drain-disconnect cycle.
    async fn run_session(&self) {
        // Pull everything queued so far into the must-process batch; these
        // commands are guaranteed a resolution or an explicit re-queue from
        // this attempt.
        let mut batch: VecDeque<PendingCommand> = {
            let mut queue = self.queue.lock();
            std::mem::take(&mut queue.pending)
        };

        self.state_tx.send_replace(SessionState::Connecting);
        debug!(device = %self.label, batch = batch.len(), "opening session");

        // The transport retries internally; one failed call means the link
        // is not coming up for this attempt. No handle exists yet, so there
        // is nothing to disconnect on this path.
        let conn = tokio::select! {
            _ = self.cancel.cancelled() => {
                for cmd in batch.drain(..) {
                    cmd.resolve(false);
                }
                return;
            }
            res = self.transport.connect() => match res {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(device = %self.label, error = %e, "session connect failed");
                    for cmd in batch.drain(..) {
                        cmd.resolve(false);
                    }
                    return;
                }
            }
        };

        let outcome = self.drain(conn.as_ref(), &mut batch).await;

        // Teardown runs unconditionally, however draining exited.
        self.state_tx.send_replace(SessionState::Closing);
        if let Err(e) = conn.unsubscribe(self.chars.recv).await {
            debug!(device = %self.label, error = %e, "unsubscribe during teardown failed");
        }
        if let Err(e) = conn.disconnect().await {
            warn!(device = %self.label, error = %e, "disconnect failed");
        }

        match outcome {
            Ok(()) => {}
            Err(SessionAbort::Drain(e)) => {
                warn!(device = %self.label, error = %e, "session aborted mid-drain");
                let mut queue = self.queue.lock();
                while let Some(cmd) = batch.pop_back() {
                    queue.pending.push_front(cmd);
                }
            }
            Err(SessionAbort::Setup(e)) => {
                warn!(device = %self.label, error = %e, "session setup failed");
                for cmd in batch.drain(..) {
                    cmd.resolve(false);
                }
            }
            Err(SessionAbort::Cancelled) => {
                debug!(device = %self.label, "session cancelled");
                for cmd in batch.drain(..) {
                    cmd.resolve(false);
                }
            }
        }
    }

    /// Authenticate, then drain the batch and the live queue serially.
    async fn drain(
        &self,
        conn: &dyn PlugConnection,
        batch: &mut VecDeque<PendingCommand>,
    ) -> Result<(), SessionAbort> {
        self.state_tx.send_replace(SessionState::Authenticating);
        let mut session = tokio::select! {
            _ = self.cancel.cancelled() => return Err(SessionAbort::Cancelled),
            res = PlugSession::establish(
                conn,
                self.chars,
                self.credential.key_bytes(),
                self.policy.ack_timeout(),
            ) => res.map_err(|e| SessionAbort::Setup(e.into()))?,
        };

        self.state_tx.send_replace(SessionState::Draining);

        // Must-process batch first, in submission order.
        while let Some(cmd) = batch.pop_front() {
            self.exchange(&mut session, cmd).await?;
        }

        // Then stay on the live queue until it runs dry for idle_timeout.
        while let Some(cmd) = self.next_command().await {
            self.exchange(&mut session, cmd).await?;
        }

        Ok(())
    }

    /// Send one command and resolve its handle on every path: success,
    /// failure, or cancellation mid-exchange.
    async fn exchange(
        &self,
        session: &mut PlugSession<'_>,
        cmd: PendingCommand,
    ) -> Result<(), SessionAbort> {
        let res = tokio::select! {
            _ = self.cancel.cancelled() => None,
            res = session.send_command(&cmd.frame) => Some(res),
        };

        match res {
            None => {
                cmd.resolve(false);
                Err(SessionAbort::Cancelled)
            }
            Some(Ok(())) => {
                cmd.resolve(true);
                Ok(())
            }
            Some(Err(e)) => {
                cmd.resolve(false);
                Err(SessionAbort::Drain(e.into()))
            }
        }
    }

    /// Pull the next live-queue command, giving up after the idle timeout.
    async fn next_command(&self) -> Option<PendingCommand> {
        loop {
            // Arm the wakeup before checking the queue; a submit landing
            // between the check and the wait still stores its permit.
            let wakeup = self.wakeup.notified();
            if let Some(cmd) = self.queue.lock().pending.pop_front() {
                return Some(cmd);
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                res = tokio::time::timeout(self.policy.idle_timeout(), wakeup) => match res {
                    Ok(()) => {}
                    Err(_) => return None,
                },
            }
        }
    }
}
