//! Gateway discovery.
//!
//! One-shot HTTPS call that tells the runtime where the gateway lives, how
//! many shards to run, and how many session starts the bot has left. No
//! retries here; the caller decides what a failure means.

use crate::error::Error;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Response of the gateway discovery endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayInfo {
    /// Websocket URL every shard connects to
    pub url: String,
    /// Recommended (and required) shard count
    pub shards: u32,
    /// Identify budget for this bot
    pub session_start_limit: SessionStartLimit,
}

/// Remaining identify budget, as reported by the platform.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionStartLimit {
    /// Session starts left in the current window
    pub remaining: u64,
    /// Total session starts per window
    #[serde(default)]
    pub total: u64,
    /// Milliseconds until the window resets
    #[serde(default)]
    pub reset_after: u64,
    /// How many identifies may run concurrently
    #[serde(default)]
    pub max_concurrency: u64,
}

/// Fetch gateway metadata from `url`, authenticating with `token`.
///
/// A response without a `url` field is a failure even when the status is 200.
pub async fn fetch_gateway(url: &str, token: &str) -> Result<GatewayInfo, Error> {
    let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
    let response = client.get(url).header(AUTHORIZATION, token).send().await?;

    if !response.status().is_success() {
        return Err(Error::Discovery(format!(
            "gateway endpoint returned {}",
            response.status()
        )));
    }

    let body: serde_json::Value = response.json().await?;
    if body.get("url").and_then(serde_json::Value::as_str).is_none() {
        return Err(Error::Discovery(
            "response is missing the gateway url".to_string(),
        ));
    }

    let info: GatewayInfo = serde_json::from_value(body)?;
    debug!(url = %info.url, shards = info.shards, remaining = info.session_start_limit.remaining,
        "gateway discovered");
    Ok(info)
}
