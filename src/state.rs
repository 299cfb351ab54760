//! Per-shard session state and the pure transition function.
//!
//! [`step`] is deliberately free of I/O: it maps the current session plus one
//! input (a websocket event or a decoded payload) to the next session and a
//! list of [`Effect`]s. The shard runner interprets shard-local effects; the
//! fleet coordinator interprets bot-level ones. This keeps every protocol
//! decision unit-testable without a socket.

use crate::payload::{self, GatewayPayload};
use crate::socket::SocketEvent;
use serde_json::Value;

/// Close codes after which the old session is gone and a resume is impossible.
pub const NEW_SESSION_CLOSE_CODES: &[u16] = &[4003, 4004, 4007, 4009];

/// Close codes that stop the whole bot when `stop_on_fatal_code` is set.
pub const FATAL_CLOSE_CODES: &[u16] = &[4001, 4002, 4003, 4004, 4005, 4008, 4010];

/// Close code directing the bot to re-shard.
pub const RESHARD_CLOSE_CODE: u16 = 4011;

/// The protocol-visible state of one shard's session.
///
/// Handles (socket, channels) live in the runner; this struct is pure data so
/// the transition function can stay pure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Shard identifier (0-indexed)
    pub id: u32,
    /// Total shard count the fleet was started with
    pub count: u32,
    /// Bot token, sent in identify and resume frames
    pub token: String,
    /// Session id handed out by the `READY` dispatch
    pub session_id: Option<String>,
    /// Last observed dispatch sequence number
    pub seq: Option<u64>,
    /// True iff the last heartbeat has been acknowledged
    pub ack: bool,
    /// Latched when the server invalidates the session
    pub invalid_session: bool,
    /// Close code of the most recent disconnect
    pub stop_code: Option<u16>,
    /// Close reason of the most recent disconnect
    pub disconnect_reason: Option<String>,
}

impl Session {
    /// Create a fresh, never-connected session for shard `id` of `count`.
    pub fn new(id: u32, count: u32, token: impl Into<String>) -> Self {
        Self {
            id,
            count,
            token: token.into(),
            session_id: None,
            seq: None,
            ack: true,
            invalid_session: false,
            stop_code: None,
            disconnect_reason: None,
        }
    }

    /// Whether the next connect should resume instead of identify.
    ///
    /// True iff the shard was disconnected with a code outside the
    /// new-session set and still holds a session id and sequence number.
    pub fn should_resume(&self) -> bool {
        match self.stop_code {
            Some(code) => {
                !NEW_SESSION_CLOSE_CODES.contains(&code)
                    && self.session_id.is_some()
                    && self.seq.is_some()
            }
            None => false,
        }
    }
}

/// Whether `session` is eligible to resume on its next connect.
pub fn should_resume(session: &Session) -> bool {
    session.should_resume()
}

/// One input to the transition function.
#[derive(Debug, Clone)]
pub enum Input {
    /// A lifecycle event from the websocket driver
    Socket(SocketEvent),
    /// An already-decoded server frame
    Payload(GatewayPayload),
}

/// A declarative intent produced by [`step`].
///
/// Shard-local effects are interpreted by the runner; bot-level ones are
/// escalated to the fleet coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send an identify frame on the current socket
    Identify,
    /// Open a fresh socket and send a resume frame on it
    Resume,
    /// Install a heartbeat channel beating every `interval_ms`
    StartHeartbeat {
        /// Beat interval in milliseconds
        interval_ms: u64,
    },
    /// Request one heartbeat tick out of band
    SendHeartbeat,
    /// Open a fresh socket and event inbox, clearing disconnect state
    Reconnect,
    /// Send a raw text frame on the current socket
    SendFrame(String),
    /// Log a non-fatal error and continue
    Error(String),
    /// Bot-level: tear down the fleet and restart with a new shard count
    ReShard,
    /// Bot-level: forward a dispatch to the consumer
    Event {
        /// Server-provided event type name
        kind: String,
        /// Opaque event body
        data: Value,
    },
    /// Bot-level: stop the whole bot (fatal close code)
    DisconnectBot,
}

impl Effect {
    /// True for effects the runner must escalate to the coordinator.
    pub fn is_bot_level(&self) -> bool {
        matches!(
            self,
            Effect::ReShard | Effect::Event { .. } | Effect::DisconnectBot
        )
    }
}

/// Result of one transition: the next session (None once the shard is dead)
/// and the effects to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub session: Option<Session>,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn new(session: Option<Session>, effects: Vec<Effect>) -> Self {
        Self { session, effects }
    }
}

/// Pure transition function: `(session, input) -> (session', effects)`.
///
/// `stop_on_fatal` selects the disconnect policy for fatal close codes.
/// Classification on disconnect is evaluated re-shard first, then fatal, then
/// reconnect.
pub fn step(session: Option<Session>, input: Input, stop_on_fatal: bool) -> Transition {
    let Some(mut session) = session else {
        // A late event for an already-dead shard carries no work.
        return Transition::new(None, Vec::new());
    };

    match input {
        Input::Socket(SocketEvent::Connect) => {
            let effect = if session.should_resume() {
                Effect::Resume
            } else {
                Effect::Identify
            };
            Transition::new(Some(session), vec![effect])
        }

        Input::Socket(SocketEvent::Disconnect { code, reason }) => {
            session.stop_code = Some(code);
            session.disconnect_reason = Some(reason);
            let effect = if code == RESHARD_CLOSE_CODE {
                Effect::ReShard
            } else if stop_on_fatal && FATAL_CLOSE_CODES.contains(&code) {
                Effect::DisconnectBot
            } else {
                Effect::Reconnect
            };
            Transition::new(Some(session), vec![effect])
        }

        Input::Socket(SocketEvent::Error(err)) => {
            Transition::new(Some(session), vec![Effect::Error(err)])
        }

        Input::Socket(SocketEvent::Message(text)) => match payload::decode(&text) {
            Ok(decoded) => step(Some(session), Input::Payload(decoded), stop_on_fatal),
            Err(err) => Transition::new(
                Some(session),
                vec![Effect::Error(format!("discarding frame: {err}"))],
            ),
        },

        Input::Payload(GatewayPayload::Hello {
            heartbeat_interval_ms,
        }) => Transition::new(
            Some(session),
            vec![Effect::StartHeartbeat {
                interval_ms: heartbeat_interval_ms,
            }],
        ),

        Input::Payload(GatewayPayload::Heartbeat) => {
            Transition::new(Some(session), vec![Effect::SendHeartbeat])
        }

        Input::Payload(GatewayPayload::HeartbeatAck) => {
            session.ack = true;
            Transition::new(Some(session), Vec::new())
        }

        Input::Payload(GatewayPayload::Reconnect) => {
            Transition::new(Some(session), vec![Effect::Reconnect])
        }

        Input::Payload(GatewayPayload::InvalidSession { .. }) => {
            session.session_id = None;
            session.seq = None;
            session.invalid_session = true;
            Transition::new(Some(session), vec![Effect::Reconnect])
        }

        Input::Payload(GatewayPayload::Dispatch { kind, seq, data }) => {
            session.seq = Some(seq);
            if kind == "READY" {
                if let Some(sid) = data.get("session_id").and_then(Value::as_str) {
                    session.session_id = Some(sid.to_owned());
                }
            }
            Transition::new(Some(session), vec![Effect::Event { kind, data }])
        }
    }
}
