use thiserror::Error;

/// Errors that can occur in gateway-runtime.
///
/// Only startup failures (discovery, session-start budget) surface to the
/// caller of `run_bot`; everything else is handled inside the runtime as
/// reconnect/resume effects.
#[derive(Error, Debug)]
pub enum Error {
    /// WebSocket connection error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Gateway discovery request failed at the transport level
    #[error("gateway discovery request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Gateway discovery returned a response the runtime cannot use
    #[error("gateway discovery returned an unusable response: {0}")]
    Discovery(String),

    /// Not enough session starts left to bring up the whole fleet
    #[error("refusing to start: {remaining} session starts remaining for {shards} shards")]
    SessionStartsExhausted { remaining: u64, shards: u32 },

    /// Connection failed after all retry attempts
    #[error("connection failed after {attempts} attempts: {last_error}")]
    ConnectionFailed { attempts: u32, last_error: String },

    /// The websocket URL handed out by discovery could not be parsed
    #[error("invalid gateway url: {0}")]
    InvalidUrl(String),

    /// The socket driver is gone; outgoing frames can no longer be sent
    #[error("socket is closed")]
    SocketClosed,

    /// A wire frame could not be decoded
    #[error(transparent)]
    Codec(#[from] crate::payload::CodecError),

    /// JSON (de)serialization error outside the wire codec
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}
