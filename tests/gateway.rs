//! End-to-end tests driving `run_bot` against in-process mock discovery and
//! gateway servers.

use futures_util::{SinkExt, StreamExt};
use gateway_runtime::{run_bot, BotCommand, BotConfig, ExitReason, GatewayEvent};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How a mock gateway connection behaves after the handshake.
#[derive(Debug, Clone, Copy)]
enum ServerMode {
    /// Send hello, answer identifies with READY, optionally ack heartbeats
    Ready {
        heartbeat_interval: u64,
        ack_heartbeats: bool,
    },
    /// Close immediately with the given code
    CloseWith { code: u16 },
}

/// Spawn a mock websocket gateway. Returns its URL and a counter of accepted
/// connections.
async fn spawn_gateway(mode: ServerMode) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));

    let accepted = connections.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            accepted.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(serve_connection(stream, mode));
        }
    });

    (format!("ws://{addr}"), connections)
}

async fn serve_connection(stream: TcpStream, mode: ServerMode) {
    let mut ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(_) => return,
    };

    match mode {
        ServerMode::CloseWith { code } => {
            let _ = ws
                .close(Some(CloseFrame {
                    code: CloseCode::from(code),
                    reason: "".into(),
                }))
                .await;
            while let Some(Ok(_)) = ws.next().await {}
        }
        ServerMode::Ready {
            heartbeat_interval,
            ack_heartbeats,
        } => {
            let hello = json!({"op": 10, "d": {"heartbeat_interval": heartbeat_interval}});
            if ws.send(Message::Text(hello.to_string())).await.is_err() {
                return;
            }

            let mut seq = 0u64;
            while let Some(Ok(message)) = ws.next().await {
                let Message::Text(text) = message else {
                    continue;
                };
                let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                match frame["op"].as_u64() {
                    Some(2) => {
                        seq += 1;
                        let ready = json!({
                            "op": 0,
                            "t": "READY",
                            "s": seq,
                            "d": {"session_id": "mock-session", "v": 10},
                        });
                        if ws.send(Message::Text(ready.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Some(1) if ack_heartbeats => {
                        if ws
                            .send(Message::Text(json!({"op": 11}).to_string()))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Spawn a mock discovery endpoint pointing at `gateway_url`.
async fn spawn_discovery(gateway_url: &str, shards: u32, remaining: u64) -> String {
    let body = format!(
        r#"{{"url":"{gateway_url}","shards":{shards},"session_start_limit":{{"remaining":{remaining},"total":1000,"reset_after":0,"max_concurrency":1}}}}"#
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let body = body.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 2048];
                let _ = stream.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    format!("http://{addr}")
}

fn test_config(api_url: String) -> BotConfig {
    BotConfig::builder()
        .api_url(api_url)
        .identify_delay(Duration::ZERO)
        .build()
        .expect("valid config")
}

#[tokio::test]
async fn happy_identify_flow_dispatches_ready() {
    let (gateway_url, connections) = spawn_gateway(ServerMode::Ready {
        heartbeat_interval: 30_000,
        ack_heartbeats: true,
    })
    .await;
    let api_url = spawn_discovery(&gateway_url, 1, 100).await;

    let (event_tx, mut event_rx) = mpsc::channel::<GatewayEvent>(64);
    let (command_tx, command_rx) = mpsc::channel::<BotCommand>(1);
    let config = test_config(api_url);
    let bot = tokio::spawn(async move { run_bot(event_tx, command_rx, "Bot test", config).await });

    let event = timeout(TEST_TIMEOUT, event_rx.recv())
        .await
        .expect("READY before timeout")
        .expect("sink open");
    assert_eq!(event.kind, "READY");
    assert_eq!(event.data["session_id"], "mock-session");
    assert_eq!(connections.load(Ordering::SeqCst), 1);

    command_tx.send(BotCommand::Disconnect).await.unwrap();
    let exit = timeout(TEST_TIMEOUT, bot).await.unwrap().unwrap().unwrap();
    assert_eq!(exit, ExitReason::Normal);
}

#[tokio::test]
async fn missed_heartbeat_ack_forces_a_second_connection() {
    // The server never acks, so the second tick must declare the connection a
    // zombie and reconnect.
    let (gateway_url, connections) = spawn_gateway(ServerMode::Ready {
        heartbeat_interval: 80,
        ack_heartbeats: false,
    })
    .await;
    let api_url = spawn_discovery(&gateway_url, 1, 100).await;

    let (event_tx, _event_rx) = mpsc::channel::<GatewayEvent>(64);
    let (command_tx, command_rx) = mpsc::channel::<BotCommand>(1);
    let config = test_config(api_url);
    let bot = tokio::spawn(async move { run_bot(event_tx, command_rx, "Bot test", config).await });

    let reconnected = timeout(TEST_TIMEOUT, async {
        loop {
            if connections.load(Ordering::SeqCst) >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(reconnected.is_ok(), "zombie connection was never replaced");

    command_tx.send(BotCommand::Disconnect).await.unwrap();
    let exit = timeout(TEST_TIMEOUT, bot).await.unwrap().unwrap().unwrap();
    assert_eq!(exit, ExitReason::Normal);
}

#[tokio::test]
async fn reshard_close_code_tears_the_fleet_down() {
    let (gateway_url, _connections) = spawn_gateway(ServerMode::CloseWith { code: 4011 }).await;
    let api_url = spawn_discovery(&gateway_url, 1, 100).await;

    let (event_tx, _event_rx) = mpsc::channel::<GatewayEvent>(64);
    let (_command_tx, command_rx) = mpsc::channel::<BotCommand>(1);
    let config = test_config(api_url);

    let exit = timeout(
        TEST_TIMEOUT,
        run_bot(event_tx, command_rx, "Bot test", config),
    )
    .await
    .expect("run_bot returned")
    .expect("no startup error");
    assert_eq!(exit, ExitReason::Reshard);
}

#[tokio::test]
async fn fatal_close_code_stops_the_bot_when_configured() {
    let (gateway_url, _connections) = spawn_gateway(ServerMode::CloseWith { code: 4004 }).await;
    let api_url = spawn_discovery(&gateway_url, 1, 100).await;

    let (event_tx, _event_rx) = mpsc::channel::<GatewayEvent>(64);
    let (_command_tx, command_rx) = mpsc::channel::<BotCommand>(1);
    let config = BotConfig::builder()
        .api_url(api_url)
        .identify_delay(Duration::ZERO)
        .stop_on_fatal_code(true)
        .build()
        .expect("valid config");

    let exit = timeout(
        TEST_TIMEOUT,
        run_bot(event_tx, command_rx, "Bot test", config),
    )
    .await
    .expect("run_bot returned")
    .expect("no startup error");
    assert_eq!(exit, ExitReason::Fatal);
}

#[tokio::test]
async fn exhausted_session_starts_refuse_startup() {
    let (gateway_url, connections) = spawn_gateway(ServerMode::Ready {
        heartbeat_interval: 30_000,
        ack_heartbeats: true,
    })
    .await;
    // remaining == shards is not enough; starting would risk a lockout
    let api_url = spawn_discovery(&gateway_url, 1, 1).await;

    let (event_tx, _event_rx) = mpsc::channel::<GatewayEvent>(64);
    let (_command_tx, command_rx) = mpsc::channel::<BotCommand>(1);
    let config = test_config(api_url);

    let result = timeout(
        TEST_TIMEOUT,
        run_bot(event_tx, command_rx, "Bot test", config),
    )
    .await
    .expect("run_bot returned");
    assert!(matches!(
        result,
        Err(gateway_runtime::Error::SessionStartsExhausted {
            remaining: 1,
            shards: 1
        })
    ));
    // no shard ever connected
    assert_eq!(connections.load(Ordering::SeqCst), 0);
}
