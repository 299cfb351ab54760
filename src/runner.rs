//! Shard runner.
//!
//! One runner task per shard. It multiplexes the stop signal, the control
//! inbox, heartbeat ticks, and websocket events (in that priority order),
//! feeds every input through the pure state machine, performs the I/O the
//! resulting effects demand, and escalates bot-level effects to the fleet
//! coordinator.

use crate::config::BotConfig;
use crate::error::Error;
use crate::heartbeat::HeartbeatHandle;
use crate::metrics::Metrics;
use crate::payload;
use crate::socket::{self, SocketEvent, SocketHandle};
use crate::state::{self, Effect, Input, Session};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Commands the coordinator (or host) may send to one shard.
#[derive(Debug)]
pub(crate) enum ControlCommand {
    /// Open the websocket and start the session handshake
    Connect,
    /// Send a raw frame on the current socket (reserved for outbound
    /// payloads such as presence updates)
    SendFrame(String),
}

/// Bot-level effects surfaced by one runner iteration.
#[derive(Debug)]
pub(crate) struct ShardResult {
    pub shard_id: u32,
    pub effects: Vec<Effect>,
}

pub(crate) struct ShardRunner {
    shard_id: u32,
    session: Option<Session>,
    gateway_url: String,
    config: BotConfig,
    metrics: Arc<Metrics>,
    socket: Option<SocketHandle>,
    socket_events: Option<mpsc::Receiver<SocketEvent>>,
    heartbeat: Option<HeartbeatHandle>,
    control_rx: mpsc::Receiver<ControlCommand>,
    stop_rx: mpsc::Receiver<()>,
    results_tx: mpsc::Sender<ShardResult>,
}

impl ShardRunner {
    pub(crate) fn new(
        session: Session,
        gateway_url: String,
        config: BotConfig,
        metrics: Arc<Metrics>,
        control_rx: mpsc::Receiver<ControlCommand>,
        stop_rx: mpsc::Receiver<()>,
        results_tx: mpsc::Sender<ShardResult>,
    ) -> Self {
        Self {
            shard_id: session.id,
            session: Some(session),
            gateway_url,
            config,
            metrics,
            socket: None,
            socket_events: None,
            heartbeat: None,
            control_rx,
            stop_rx,
            results_tx,
        }
    }

    /// Drive the shard until it is stopped or its session dies.
    pub(crate) async fn run(mut self) {
        debug!("[SHARD-{}] Runner started", self.shard_id);

        loop {
            tokio::select! {
                // Stop always wins over pending work.
                biased;

                _ = self.stop_rx.recv() => {
                    info!("[SHARD-{}] Stop requested", self.shard_id);
                    break;
                }

                cmd = self.control_rx.recv() => match cmd {
                    Some(ControlCommand::Connect) => {
                        // A fresh connect obsoletes any heartbeat from the
                        // previous session.
                        self.heartbeat = None;
                        if let Err(e) = self.open_socket().await {
                            error!("[SHARD-{}] Giving up on shard: {}", self.shard_id, e);
                            break;
                        }
                    }
                    Some(ControlCommand::SendFrame(frame)) => self.send_frame(frame).await,
                    None => {
                        debug!("[SHARD-{}] Control channel closed", self.shard_id);
                        break;
                    }
                },

                _ = Self::next_tick(&mut self.heartbeat) => self.on_heartbeat_tick().await,

                event = Self::next_event(&mut self.socket_events) => match event {
                    Some(event) => self.on_socket_event(event).await,
                    None => self.socket_events = None,
                },
            }

            if self.session.is_none() {
                break;
            }
        }

        self.shutdown().await;
    }

    /// Resolve the next heartbeat tick, or park forever if none is installed.
    async fn next_tick(heartbeat: &mut Option<HeartbeatHandle>) {
        match heartbeat {
            Some(hb) => hb.tick().await,
            None => std::future::pending().await,
        }
    }

    /// Resolve the next socket event, or park forever without an inbox.
    async fn next_event(events: &mut Option<mpsc::Receiver<SocketEvent>>) -> Option<SocketEvent> {
        match events {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }

    /// Heartbeat tick: beacon if the last one was acked, otherwise the
    /// connection is a zombie and gets replaced.
    async fn on_heartbeat_tick(&mut self) {
        let acked = match &self.session {
            Some(session) => session.ack,
            None => return,
        };

        if acked {
            let seq = self.session.as_ref().and_then(|s| s.seq);
            if let Some(session) = self.session.as_mut() {
                session.ack = false;
            }
            self.send_frame(payload::encode_heartbeat(seq)).await;
            self.metrics.record_heartbeat_sent();
        } else {
            warn!(
                "[SHARD-{}] Heartbeat not acknowledged, replacing zombie connection",
                self.shard_id
            );
            self.metrics.record_zombie_reconnect();
            self.heartbeat = None;
            if let Err(e) = self.open_socket().await {
                error!("[SHARD-{}] Giving up on shard: {}", self.shard_id, e);
                self.session = None;
            }
        }
    }

    /// Feed one websocket event through the state machine and apply the
    /// resulting effects.
    async fn on_socket_event(&mut self, event: SocketEvent) {
        if matches!(event, SocketEvent::Disconnect { .. }) {
            // The heartbeat belongs to the session that just died; the next
            // hello installs a fresh one.
            self.heartbeat = None;
            self.metrics
                .update_shard(self.shard_id as usize, |s| s.is_connected = false);
        }

        let transition = state::step(
            self.session.take(),
            Input::Socket(event),
            self.config.stop_on_fatal_code,
        );
        self.session = transition.session;

        let mut bot_effects = Vec::new();
        for effect in transition.effects {
            self.apply_effect(effect, &mut bot_effects).await;
        }

        if !bot_effects.is_empty() {
            let result = ShardResult {
                shard_id: self.shard_id,
                effects: bot_effects,
            };
            if self.results_tx.send(result).await.is_err() {
                // Coordinator is gone; nothing left to run for.
                debug!("[SHARD-{}] Result channel closed", self.shard_id);
                self.session = None;
            }
        }
    }

    /// Interpret one effect. Shard-local effects perform I/O here; bot-level
    /// ones are collected for the coordinator.
    async fn apply_effect(&mut self, effect: Effect, bot_effects: &mut Vec<Effect>) {
        match effect {
            Effect::Identify => {
                let frame = match &self.session {
                    Some(s) => payload::encode_identify(&s.token, s.id, s.count),
                    None => return,
                };
                debug!("[SHARD-{}] Identifying", self.shard_id);
                self.send_frame(frame).await;
            }

            Effect::Resume => {
                // The socket that delivered the connect event is discarded on
                // purpose; the resume handshake runs on a fresh one.
                if let Err(e) = self.open_socket().await {
                    error!("[SHARD-{}] Giving up on shard: {}", self.shard_id, e);
                    self.session = None;
                    return;
                }
                let frame = match &self.session {
                    Some(Session {
                        token,
                        session_id: Some(sid),
                        seq: Some(seq),
                        ..
                    }) => payload::encode_resume(token, sid, *seq),
                    _ => {
                        warn!(
                            "[SHARD-{}] Resume requested without session state",
                            self.shard_id
                        );
                        return;
                    }
                };
                info!("[SHARD-{}] Resuming session", self.shard_id);
                self.metrics.record_resume();
                self.send_frame(frame).await;
            }

            Effect::StartHeartbeat { interval_ms } => {
                debug!(
                    "[SHARD-{}] Starting heartbeat every {}ms",
                    self.shard_id, interval_ms
                );
                self.heartbeat = Some(HeartbeatHandle::start(Duration::from_millis(interval_ms)));
                if let Some(session) = self.session.as_mut() {
                    session.ack = true;
                }
            }

            Effect::SendHeartbeat => {
                if let Some(hb) = &self.heartbeat {
                    hb.request();
                }
            }

            Effect::Reconnect => {
                if let Some(session) = self.session.as_mut() {
                    session.invalid_session = false;
                    session.stop_code = None;
                    session.disconnect_reason = None;
                }
                if let Err(e) = self.open_socket().await {
                    error!("[SHARD-{}] Giving up on shard: {}", self.shard_id, e);
                    self.session = None;
                } else {
                    self.metrics.record_reconnection();
                }
            }

            Effect::SendFrame(frame) => self.send_frame(frame).await,

            Effect::Error(message) => {
                warn!("[SHARD-{}] {}", self.shard_id, message);
                self.metrics.record_error();
            }

            bot_level => bot_effects.push(bot_level),
        }
    }

    /// Open a fresh websocket (closing or abandoning the previous one first)
    /// and install its event inbox, pacing a bounded number of retries.
    async fn open_socket(&mut self) -> Result<(), Error> {
        if let Some(old) = self.socket.take() {
            if let Err(e) = old.close().await {
                debug!("[SHARD-{}] Old socket close failed: {}", self.shard_id, e);
            }
        }
        // Abandon the previous inbox; its driver stops on the next send.
        self.socket_events = None;

        let mut last_error = String::new();
        for attempt in 0..self.config.connection.max_connect_attempts {
            if attempt > 0 {
                let delay = self.config.connection.retry_delay_for(attempt);
                debug!(
                    "[SHARD-{}] Reconnecting in {:?} (attempt {})",
                    self.shard_id,
                    delay,
                    attempt + 1
                );
                tokio::time::sleep(delay).await;
            }

            let connect = socket::connect(
                &self.gateway_url,
                self.config.max_frame_size,
                self.config.event_buffer,
            );
            match timeout(self.config.connection.connect_timeout, connect).await {
                Ok(Ok((handle, events))) => {
                    self.socket = Some(handle);
                    self.socket_events = Some(events);
                    self.metrics.record_connection();
                    self.metrics.update_shard(self.shard_id as usize, |s| {
                        s.is_connected = true;
                        s.last_connected_at = Some(Instant::now());
                    });
                    info!(
                        "[SHARD-{}] Connected to {}",
                        self.shard_id, self.gateway_url
                    );
                    return Ok(());
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => last_error = "connection timeout".to_string(),
            }
            warn!(
                "[SHARD-{}] Connect attempt {} failed: {}",
                self.shard_id,
                attempt + 1,
                last_error
            );
        }

        Err(Error::ConnectionFailed {
            attempts: self.config.connection.max_connect_attempts,
            last_error,
        })
    }

    /// Send a frame on the current socket, if any. Send failures are logged;
    /// the socket driver reports the broken stream through the inbox.
    async fn send_frame(&mut self, frame: String) {
        match &self.socket {
            Some(socket) => {
                if let Err(e) = socket.send_text(frame).await {
                    warn!("[SHARD-{}] Frame send failed: {}", self.shard_id, e);
                } else {
                    self.metrics.record_frame_sent();
                }
            }
            None => warn!(
                "[SHARD-{}] Dropping outbound frame: no live socket",
                self.shard_id
            ),
        }
    }

    /// Tear down subordinate resources on any exit path.
    async fn shutdown(mut self) {
        self.heartbeat = None;
        if let Some(socket) = self.socket.take() {
            if let Err(e) = socket.close().await {
                debug!("[SHARD-{}] Socket close failed: {}", self.shard_id, e);
            }
        }
        self.metrics
            .update_shard(self.shard_id as usize, |s| s.is_connected = false);
        info!("[SHARD-{}] Runner stopped", self.shard_id);
    }
}
