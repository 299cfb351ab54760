//! Fleet coordinator.
//!
//! [`run_bot`] discovers the gateway, brings up one runner per shard with a
//! staggered identify schedule, relays dispatch events to the consumer, and
//! orchestrates shutdown: orderly on a host disconnect, full teardown on a
//! re-shard directive or a fatal close code.

use crate::config::BotConfig;
use crate::discovery;
use crate::error::Error;
use crate::metrics::Metrics;
use crate::runner::{ControlCommand, ShardResult, ShardRunner};
use crate::state::{Effect, Session};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Buffer for the shared runner-result channel
const RESULT_BUFFER: usize = 64;
/// Buffer for each shard's control inbox
const CONTROL_BUFFER: usize = 16;
/// How long to wait for runners to observe their stop signal
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Commands the host may send while the bot runs.
#[derive(Debug)]
pub enum BotCommand {
    /// Request an orderly shutdown of every shard
    Disconnect,
}

/// Why `run_bot` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The host asked for a shutdown (or the event sink went away)
    Normal,
    /// The gateway demanded a new shard count; call `run_bot` again
    Reshard,
    /// A shard hit a fatal close code with `stop_on_fatal_code` set
    Fatal,
}

/// One dispatch forwarded to the consumer, tagged with its server-provided
/// type name.
#[derive(Debug, Clone)]
pub struct GatewayEvent {
    /// Event type name (e.g. `READY`, `MESSAGE_CREATE`)
    pub kind: String,
    /// Opaque event body
    pub data: Value,
}

struct ShardHandles {
    id: u32,
    stop_tx: mpsc::Sender<()>,
    runner: JoinHandle<()>,
    stagger: JoinHandle<()>,
    // Held so the shard's control inbox stays open for the whole run.
    _control_tx: mpsc::Sender<ControlCommand>,
}

/// Run the bot until it stops.
///
/// Events arrive on `output` in the order each shard produced them; the host
/// requests shutdown through `commands`. Only startup failures return an
/// error; a running bot always resolves to an [`ExitReason`].
pub async fn run_bot(
    output: mpsc::Sender<GatewayEvent>,
    commands: mpsc::Receiver<BotCommand>,
    token: &str,
    config: BotConfig,
) -> Result<ExitReason, Error> {
    run_bot_with_metrics(output, commands, token, config, Arc::new(Metrics::new())).await
}

/// Like [`run_bot`], with a caller-owned [`Metrics`] handle for observability.
pub async fn run_bot_with_metrics(
    output: mpsc::Sender<GatewayEvent>,
    mut commands: mpsc::Receiver<BotCommand>,
    token: &str,
    config: BotConfig,
    metrics: Arc<Metrics>,
) -> Result<ExitReason, Error> {
    let info = discovery::fetch_gateway(&config.api_url, token).await?;

    // Starting a fleet that would burn the whole identify budget risks a
    // lockout, so require strictly more starts than shards.
    if info.session_start_limit.remaining <= u64::from(info.shards) {
        return Err(Error::SessionStartsExhausted {
            remaining: info.session_start_limit.remaining,
            shards: info.shards,
        });
    }

    info!(
        shards = info.shards,
        url = %info.url,
        "Starting gateway fleet"
    );

    let (results_tx, mut results_rx) = mpsc::channel::<ShardResult>(RESULT_BUFFER);
    let mut fleet = Vec::with_capacity(info.shards as usize);

    for id in 0..info.shards {
        let (control_tx, control_rx) = mpsc::channel(CONTROL_BUFFER);
        let (stop_tx, stop_rx) = mpsc::channel(1);

        let runner = ShardRunner::new(
            Session::new(id, info.shards, token),
            info.url.clone(),
            config.clone(),
            metrics.clone(),
            control_rx,
            stop_rx,
            results_tx.clone(),
        );
        let runner = tokio::spawn(runner.run());

        // The platform permits one identify per `identify_delay`, so shard i
        // connects after i times that delay.
        let delay = config.identify_delay * id;
        let connect_tx = control_tx.clone();
        let stagger = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if connect_tx.send(ControlCommand::Connect).await.is_err() {
                debug!("[SHARD-{}] Exited before its staggered connect", id);
            }
        });

        fleet.push(ShardHandles {
            id,
            stop_tx,
            runner,
            stagger,
            _control_tx: control_tx,
        });
    }
    // The runners own the remaining senders; recv() returns None once every
    // runner has exited.
    drop(results_tx);

    let exit = loop {
        tokio::select! {
            biased;

            command = commands.recv() => match command {
                Some(BotCommand::Disconnect) | None => {
                    info!("Host requested disconnect");
                    break ExitReason::Normal;
                }
            },

            result = results_rx.recv() => match result {
                Some(result) => {
                    if let Some(reason) = apply_bot_effects(result, &output, &metrics).await {
                        break reason;
                    }
                }
                None => {
                    warn!("Every shard runner exited on its own");
                    break ExitReason::Normal;
                }
            },
        }
    };

    shutdown_fleet(fleet, &mut results_rx).await;
    Ok(exit)
}

/// Apply one runner result. Returns the exit reason when an effect ends the
/// whole bot.
async fn apply_bot_effects(
    result: ShardResult,
    output: &mpsc::Sender<GatewayEvent>,
    metrics: &Metrics,
) -> Option<ExitReason> {
    for effect in result.effects {
        match effect {
            Effect::Event { kind, data } => {
                metrics.record_event_dispatched();
                if output.send(GatewayEvent { kind, data }).await.is_err() {
                    warn!("Event sink closed, shutting down");
                    return Some(ExitReason::Normal);
                }
            }
            Effect::ReShard => {
                // Rolling reconnects would route events to the wrong shards,
                // so the whole fleet comes down and the caller restarts it.
                info!(shard = result.shard_id, "Gateway requested a re-shard");
                return Some(ExitReason::Reshard);
            }
            Effect::DisconnectBot => {
                warn!(
                    shard = result.shard_id,
                    "Fatal close code, stopping the bot"
                );
                return Some(ExitReason::Fatal);
            }
            other => debug!(
                shard = result.shard_id,
                "Ignoring shard-local effect {:?} at bot level", other
            ),
        }
    }
    None
}

/// Signal every shard to stop, then drain results until all runners are gone.
async fn shutdown_fleet(fleet: Vec<ShardHandles>, results_rx: &mut mpsc::Receiver<ShardResult>) {
    for shard in &fleet {
        shard.stagger.abort();
        // A full or closed stop slot means the runner is already stopping.
        let _ = shard.stop_tx.try_send(());
    }

    // Keep draining so no runner blocks on a full result channel while we
    // wait; the channel closes once the last runner drops its sender.
    let drained = timeout(SHUTDOWN_TIMEOUT, async {
        while results_rx.recv().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!("Timed out waiting for shard runners to stop");
    }

    for shard in fleet {
        if drained.is_err() {
            shard.runner.abort();
        }
        match timeout(SHUTDOWN_TIMEOUT, shard.runner).await {
            Ok(Ok(())) => debug!("[SHARD-{}] Runner joined", shard.id),
            Ok(Err(e)) if e.is_cancelled() => debug!("[SHARD-{}] Runner aborted", shard.id),
            Ok(Err(e)) => warn!("[SHARD-{}] Runner panicked: {:?}", shard.id, e),
            Err(_) => warn!("[SHARD-{}] Runner did not stop in time", shard.id),
        }
    }
    info!("Gateway fleet stopped");
}
