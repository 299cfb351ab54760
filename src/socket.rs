//! Websocket driver.
//!
//! [`connect`] performs the handshake and hands back a [`SocketHandle`] for
//! outgoing frames plus an event inbox. A background driver task owns the
//! stream and emits, in order: one [`SocketEvent::Connect`], any mix of
//! `Message`/`Error`, and exactly one terminating [`SocketEvent::Disconnect`].

use crate::error::Error;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::protocol::CloseFrame,
    tungstenite::protocol::WebSocketConfig, tungstenite::Message, Connector, MaybeTlsStream,
    WebSocketStream,
};
use tracing::{debug, trace};
use url::Url;

/// Default cap on inbound text and binary frames (4 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Close code reported when the peer vanished without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;
/// Close code reported for a locally requested close.
const NORMAL_CLOSURE: u16 = 1000;

/// Lifecycle events emitted by the driver, terminated by one `Disconnect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// The handshake completed and the stream is live
    Connect,
    /// A text frame arrived
    Message(String),
    /// A non-fatal transport error; a `Disconnect` follows if the stream dies
    Error(String),
    /// The stream is gone; `code` is the close code (1006 if none was sent)
    Disconnect { code: u16, reason: String },
}

#[derive(Debug)]
enum SocketCommand {
    Send(String),
    Close,
}

/// Write-side handle to a live websocket.
#[derive(Debug, Clone)]
pub struct SocketHandle {
    commands: mpsc::Sender<SocketCommand>,
}

impl SocketHandle {
    /// Send a text frame. Fails with [`Error::SocketClosed`] once the driver
    /// has shut down.
    pub async fn send_text(&self, text: String) -> Result<(), Error> {
        self.commands
            .send(SocketCommand::Send(text))
            .await
            .map_err(|_| Error::SocketClosed)
    }

    /// Request an orderly close. Idempotent: closing an already-dead socket
    /// is a no-op.
    pub async fn close(&self) -> Result<(), Error> {
        let _ = self.commands.send(SocketCommand::Close).await;
        Ok(())
    }
}

/// Open a websocket to `url` and spawn its driver task.
///
/// `max_frame_size` caps both text and binary frames; `buffer` sizes the
/// command and event channels. TLS endpoint verification is always on for
/// `wss://` URLs.
pub async fn connect(
    url: &str,
    max_frame_size: usize,
    buffer: usize,
) -> Result<(SocketHandle, mpsc::Receiver<SocketEvent>), Error> {
    let parsed = Url::parse(url).map_err(|e| Error::InvalidUrl(format!("{url}: {e}")))?;

    let connector = match parsed.scheme() {
        "wss" => {
            let tls = native_tls::TlsConnector::new().map_err(|e| Error::ConnectionFailed {
                attempts: 0,
                last_error: format!("TLS setup failed: {e}"),
            })?;
            Some(Connector::NativeTls(tls))
        }
        "ws" => None,
        scheme => {
            return Err(Error::InvalidUrl(format!(
                "unsupported scheme `{scheme}` in {url}"
            )))
        }
    };

    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(max_frame_size);
    ws_config.max_frame_size = Some(max_frame_size);

    let (stream, _response) =
        connect_async_tls_with_config(url, Some(ws_config), true, connector).await?;
    debug!(%url, "websocket connected");

    let (commands_tx, commands_rx) = mpsc::channel(buffer);
    let (events_tx, events_rx) = mpsc::channel(buffer);
    tokio::spawn(drive(stream, commands_rx, events_tx));

    Ok((
        SocketHandle {
            commands: commands_tx,
        },
        events_rx,
    ))
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Pump the stream until it dies or the owner closes/abandons it.
async fn drive(
    stream: WsStream,
    mut commands: mpsc::Receiver<SocketCommand>,
    events: mpsc::Sender<SocketEvent>,
) {
    let (mut write, mut read) = stream.split();

    if events.send(SocketEvent::Connect).await.is_err() {
        // Inbox dropped before we even started; nobody is listening.
        return;
    }

    let disconnect = loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(SocketCommand::Send(text)) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        let _ = events.send(SocketEvent::Error(e.to_string())).await;
                        break SocketEvent::Disconnect {
                            code: ABNORMAL_CLOSURE,
                            reason: "send failed".to_string(),
                        };
                    }
                }
                // A dropped handle closes the socket the same way an explicit
                // close does.
                Some(SocketCommand::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    break SocketEvent::Disconnect {
                        code: NORMAL_CLOSURE,
                        reason: "closed by client".to_string(),
                    };
                }
            },
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if events.send(SocketEvent::Message(text)).await.is_err() {
                        // Inbox abandoned; stop pumping.
                        return;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    trace!("ping received, answering");
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Binary(data))) => {
                    trace!(bytes = data.len(), "ignoring binary frame");
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(CloseFrame { code, reason }) => {
                            (u16::from(code), reason.into_owned())
                        }
                        None => (ABNORMAL_CLOSURE, String::new()),
                    };
                    break SocketEvent::Disconnect { code, reason };
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => {
                    let _ = events.send(SocketEvent::Error(e.to_string())).await;
                    break SocketEvent::Disconnect {
                        code: ABNORMAL_CLOSURE,
                        reason: "transport error".to_string(),
                    };
                }
                None => break SocketEvent::Disconnect {
                    code: ABNORMAL_CLOSURE,
                    reason: "stream ended".to_string(),
                },
            },
        }
    };

    let _ = events.send(disconnect).await;
    debug!("socket driver stopped");
}
