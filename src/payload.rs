//! Wire codec for gateway frames.
//!
//! Every frame on the wire is a JSON object `{"op": int, "d": any, "s": int?,
//! "t": str?}`. Inbound server frames decode into [`GatewayPayload`];
//! outbound client frames (heartbeat, identify, resume) are built by the
//! `encode_*` functions.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Server dispatches an event to the client
pub const OP_DISPATCH: u8 = 0;
/// Heartbeat beacon (client) or heartbeat request (server)
pub const OP_HEARTBEAT: u8 = 1;
/// Identify - authenticate and open a new session (client only)
pub const OP_IDENTIFY: u8 = 2;
/// Resume - replay a dropped session (client only)
pub const OP_RESUME: u8 = 6;
/// Reconnect - server requests the client reconnect (server only)
pub const OP_RECONNECT: u8 = 7;
/// Invalid Session - the session can no longer be used (server only)
pub const OP_INVALID_SESSION: u8 = 9;
/// Hello - sent on connect, carries the heartbeat interval (server only)
pub const OP_HELLO: u8 = 10;
/// Heartbeat ACK (server only)
pub const OP_HEARTBEAT_ACK: u8 = 11;

/// Name reported in the identify `properties` block.
const CLIENT_NAME: &str = env!("CARGO_PKG_NAME");

/// Codec failures.
///
/// These never terminate a connection: the runner logs the frame at warn
/// level and discards it.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The frame is not valid JSON or not an object of the expected shape
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    /// The op code is not one the client understands
    #[error("unknown op code {0}")]
    UnknownOp(u8),

    /// A field required for this op is absent
    #[error("frame is missing required field `{0}`")]
    MissingField(&'static str),
}

/// Raw wire envelope shared by every frame
#[derive(Debug, Serialize, Deserialize)]
struct Frame {
    op: u8,
    #[serde(default)]
    d: Option<Value>,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

/// A decoded server frame
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayPayload {
    /// op 0 - an event dispatch, forwarded opaquely to the consumer
    Dispatch {
        /// Server-provided event type name (e.g. `READY`, `MESSAGE_CREATE`)
        kind: String,
        /// Dispatch sequence number
        seq: u64,
        /// Event body, uninterpreted
        data: Value,
    },
    /// op 1 - the server wants an immediate heartbeat
    Heartbeat,
    /// op 7 - the server wants the client to reconnect
    Reconnect,
    /// op 9 - the session was invalidated
    InvalidSession {
        /// Whether the server claims the session is still resumable
        resumable: bool,
    },
    /// op 10 - handshake greeting
    Hello {
        /// How often to send heartbeats, in milliseconds
        heartbeat_interval_ms: u64,
    },
    /// op 11 - the last heartbeat was acknowledged
    HeartbeatAck,
}

/// Decode a text frame into a [`GatewayPayload`].
pub fn decode(text: &str) -> Result<GatewayPayload, CodecError> {
    let frame: Frame = serde_json::from_str(text)?;
    match frame.op {
        OP_DISPATCH => {
            let kind = frame.t.ok_or(CodecError::MissingField("t"))?;
            let seq = frame.s.ok_or(CodecError::MissingField("s"))?;
            Ok(GatewayPayload::Dispatch {
                kind,
                seq,
                data: frame.d.unwrap_or(Value::Null),
            })
        }
        OP_HEARTBEAT => Ok(GatewayPayload::Heartbeat),
        OP_RECONNECT => Ok(GatewayPayload::Reconnect),
        OP_INVALID_SESSION => Ok(GatewayPayload::InvalidSession {
            resumable: frame.d.as_ref().and_then(Value::as_bool).unwrap_or(false),
        }),
        OP_HELLO => {
            let d = frame.d.ok_or(CodecError::MissingField("d"))?;
            let interval = d
                .get("heartbeat_interval")
                .and_then(Value::as_u64)
                .ok_or(CodecError::MissingField("heartbeat_interval"))?;
            Ok(GatewayPayload::Hello {
                heartbeat_interval_ms: interval,
            })
        }
        OP_HEARTBEAT_ACK => Ok(GatewayPayload::HeartbeatAck),
        op => Err(CodecError::UnknownOp(op)),
    }
}

/// Encode a heartbeat frame carrying the last observed sequence number.
pub fn encode_heartbeat(seq: Option<u64>) -> String {
    json!({ "op": OP_HEARTBEAT, "d": seq }).to_string()
}

/// Encode the identify handshake frame that opens a new session.
pub fn encode_identify(token: &str, shard_id: u32, shard_count: u32) -> String {
    json!({
        "op": OP_IDENTIFY,
        "d": {
            "token": token,
            "properties": {
                "$os": std::env::consts::OS,
                "$browser": CLIENT_NAME,
                "$device": CLIENT_NAME,
            },
            "compress": false,
            "large_threshold": 50,
            "shard": [shard_id, shard_count],
        }
    })
    .to_string()
}

/// Encode the resume frame that replays a dropped session.
pub fn encode_resume(token: &str, session_id: &str, seq: u64) -> String {
    json!({
        "op": OP_RESUME,
        "d": {
            "token": token,
            "session_id": session_id,
            "seq": seq,
        }
    })
    .to_string()
}
