//! # gateway-runtime
//!
//! A sharded client runtime for a real-time chat gateway.
//!
//! ## Features
//!
//! - **Sharding** - one websocket session per shard, fanned out from a single entry point
//! - **Heartbeat liveness** - periodic beacons with ack tracking and zombie detection
//! - **Resume / re-identify** - session recovery driven by protocol close codes
//! - **Staggered startup** - shard connects are spaced to respect the identify rate limit
//! - **Re-shard orchestration** - full fleet teardown when the gateway demands new shard counts
//! - **Metrics** for observability
//!
//! ## Example
//!
//! ```ignore
//! use gateway_runtime::{run_bot, BotCommand, BotConfig, GatewayEvent};
//! use tokio::sync::mpsc;
//!
//! let config = BotConfig::builder()
//!     .stop_on_fatal_code(true)
//!     .build()?;
//!
//! let (event_tx, mut event_rx) = mpsc::channel::<GatewayEvent>(256);
//! let (command_tx, command_rx) = mpsc::channel::<BotCommand>(1);
//!
//! let exit = run_bot(event_tx, command_rx, "Bot <token>", config).await?;
//! ```
//!
//! The heart of the crate is a pure per-shard state machine ([`step`]) that
//! turns websocket events and decoded gateway payloads into [`Effect`]s; the
//! shard runner interprets shard-local effects (I/O) and escalates bot-level
//! ones to the fleet coordinator.

mod config;
mod discovery;
mod error;
mod gateway;
mod heartbeat;
mod metrics;
mod payload;
mod runner;
mod socket;
mod state;

pub use config::{BotConfig, BotConfigBuilder, ConfigError, ConnectionConfig};
pub use discovery::{fetch_gateway, GatewayInfo, SessionStartLimit};
pub use error::Error;
pub use gateway::{run_bot, run_bot_with_metrics, BotCommand, ExitReason, GatewayEvent};
pub use metrics::{Metrics, MetricsSnapshot, ShardStatus};
pub use payload::{
    decode, encode_heartbeat, encode_identify, encode_resume, CodecError, GatewayPayload,
};
pub use socket::{SocketEvent, SocketHandle, DEFAULT_MAX_FRAME_SIZE};
pub use state::{
    should_resume, step, Effect, Input, Session, Transition, FATAL_CLOSE_CODES,
    NEW_SESSION_CLOSE_CODES, RESHARD_CLOSE_CODE,
};

/// Result type for gateway-runtime operations
pub type Result<T> = std::result::Result<T, Error>;
