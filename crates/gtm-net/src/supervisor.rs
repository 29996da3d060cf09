//! Connection supervision.
//!
//! Owns the reconnect lifecycle: dial, subscribe, pump frames to the
//! engine, and on failure walk the exponential backoff schedule (1s, 2s,
//! 4s, 8s, 16s, then give up). A manual disconnect cancels any pending
//! retry and disables reconnection until the next explicit connect; a
//! kick (e.g. the process regaining foreground attention) forces an
//! immediate attempt without consuming extra schedule slots.

use gtm_core::backoff::{Decision, ReconnectPolicy};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::transport::{Connection, Incoming, Transport};

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting out the backoff delay before attempt `attempt`.
    ReconnectScheduled { attempt: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Connect,
    Disconnect,
    Kick,
}

/// Why the frame pump stopped.
enum PumpExit {
    /// The link dropped; backoff applies.
    Lost,
    /// The user asked to disconnect; stay down.
    Manual,
    /// The engine side of the payload channel is gone.
    EngineGone,
}

/// Control half held by the rest of the application.
#[derive(Clone)]
pub struct SupervisorHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnState>,
}

impl SupervisorHandle {
    /// Asks the supervisor to establish (or re-establish) a connection.
    pub async fn connect(&self) {
        let _ = self.commands.send(Command::Connect).await;
    }

    /// Tears the connection down and disables automatic reconnection.
    pub async fn disconnect(&self) {
        let _ = self.commands.send(Command::Disconnect).await;
    }

    /// Forces an immediate attempt when waiting out a backoff delay or
    /// after the schedule was exhausted.
    pub async fn kick(&self) {
        let _ = self.commands.send(Command::Kick).await;
    }

    /// A fresh watch on the connection state.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ConnState> {
        self.state.clone()
    }
}

/// The supervision task. Run it with [`Supervisor::run`] on its own task.
pub struct Supervisor<T: Transport> {
    transport: T,
    channel: String,
    policy: ReconnectPolicy,
    auto_connect: bool,
    state: watch::Sender<ConnState>,
    payloads: mpsc::Sender<Vec<u8>>,
    commands: mpsc::Receiver<Command>,
}

/// Builds a supervisor and its control handle.
///
/// `payloads` is the engine's ingest queue; the supervisor applies
/// backpressure by awaiting sends on it.
pub fn supervisor<T: Transport>(
    transport: T,
    channel: impl Into<String>,
    payloads: mpsc::Sender<Vec<u8>>,
) -> (Supervisor<T>, SupervisorHandle) {
    let (command_tx, command_rx) = mpsc::channel(16);
    let (state_tx, state_rx) = watch::channel(ConnState::Disconnected);
    (
        Supervisor {
            transport,
            channel: channel.into(),
            policy: ReconnectPolicy::new(),
            auto_connect: false,
            state: state_tx,
            payloads,
            commands: command_rx,
        },
        SupervisorHandle {
            commands: command_tx,
            state: state_rx,
        },
    )
}

impl<T: Transport> Supervisor<T> {
    /// Runs until every [`SupervisorHandle`] is dropped.
    pub async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Connect => {
                    self.auto_connect = true;
                    self.policy.reset();
                    self.drive().await;
                }
                // The connect intent is still standing after exhaustion,
                // so a kick buys one more attempt. The spent schedule
                // stays spent until a manual connect or a successful
                // attempt resets it.
                Command::Kick if self.auto_connect => self.drive().await,
                Command::Kick | Command::Disconnect => {}
            }
            if self.payloads.is_closed() {
                return;
            }
        }
    }

    /// One connect-pump-backoff cycle. Returns once the connection is
    /// intentionally down, the schedule is exhausted, or the engine is
    /// gone.
    async fn drive(&mut self) {
        loop {
            self.state.send_replace(ConnState::Connecting);
            match self.transport.connect().await {
                Ok(conn) => {
                    self.policy.reset();
                    self.state.send_replace(ConnState::Connected);
                    info!(channel = %self.channel, "connected");
                    match self.pump(conn).await {
                        PumpExit::Lost => {}
                        PumpExit::Manual | PumpExit::EngineGone => {
                            self.state.send_replace(ConnState::Disconnected);
                            return;
                        }
                    }
                }
                Err(err) => warn!(%err, "connect attempt failed"),
            }

            match self.policy.next_delay() {
                Decision::Exhausted => {
                    error!(
                        attempts = self.policy.attempt(),
                        "reconnect attempts exhausted; waiting for manual intervention"
                    );
                    self.state.send_replace(ConnState::Disconnected);
                    return;
                }
                Decision::Retry { attempt, delay } => {
                    self.state
                        .send_replace(ConnState::ReconnectScheduled { attempt });
                    info!(attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
                    if !self.wait_out(delay).await {
                        return;
                    }
                }
            }
        }
    }

    /// Waits for the backoff delay while still honoring commands.
    /// Returns false when the cycle should stop entirely.
    async fn wait_out(&mut self, delay: std::time::Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => return true,
                command = self.commands.recv() => match command {
                    None => return false,
                    Some(Command::Disconnect) => {
                        info!("manual disconnect; cancelling scheduled reconnect");
                        self.auto_connect = false;
                        self.policy.reset();
                        self.state.send_replace(ConnState::Disconnected);
                        return false;
                    }
                    // Skip the rest of the wait; the attempt counter is
                    // untouched so the schedule cannot be extended by
                    // kicking repeatedly.
                    Some(Command::Connect | Command::Kick) => return true,
                },
            }
        }
    }

    async fn pump(&mut self, mut conn: T::Conn) -> PumpExit {
        if let Err(err) = conn.subscribe(&self.channel).await {
            warn!(%err, "subscribe failed");
            return PumpExit::Lost;
        }
        loop {
            tokio::select! {
                incoming = conn.next_event() => match incoming {
                    Ok(Incoming::Message(payload)) => {
                        if self.payloads.send(payload).await.is_err() {
                            return PumpExit::EngineGone;
                        }
                    }
                    Ok(Incoming::Closed) => {
                        warn!("connection closed by peer");
                        return PumpExit::Lost;
                    }
                    Err(err) => {
                        warn!(%err, "connection error");
                        return PumpExit::Lost;
                    }
                },
                command = self.commands.recv() => match command {
                    None => return PumpExit::EngineGone,
                    Some(Command::Disconnect) => {
                        info!("manual disconnect");
                        self.auto_connect = false;
                        self.policy.reset();
                        return PumpExit::Manual;
                    }
                    Some(Command::Connect | Command::Kick) => {}
                },
            }
        }
    }
}
