//! Example: running a bot against the live gateway.
//!
//! Prints every dispatch the gateway sends until Ctrl+C.
//!
//! Run with: GATEWAY_TOKEN="Bot <token>" cargo run --example basic_bot

use gateway_runtime::{run_bot, BotCommand, BotConfig, GatewayEvent};
use tokio::sync::mpsc;
use tracing::{info, Level};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .init();

    let token = std::env::var("GATEWAY_TOKEN")?;

    let config = BotConfig::builder().stop_on_fatal_code(true).build()?;

    let (event_tx, mut event_rx) = mpsc::channel::<GatewayEvent>(256);
    let (command_tx, command_rx) = mpsc::channel::<BotCommand>(1);

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl+C received, disconnecting");
        let _ = command_tx.send(BotCommand::Disconnect).await;
    });

    let bot = tokio::spawn(async move { run_bot(event_tx, command_rx, &token, config).await });

    while let Some(event) = event_rx.recv().await {
        info!(kind = %event.kind, "dispatch received");
    }

    let exit = bot.await??;
    info!(?exit, "bot stopped");
    Ok(())
}
