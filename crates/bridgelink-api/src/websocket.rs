//! WebSocket transport to the bridge.
//!
//! [`open`] connects to `ws://<host>` and splits the stream into two tasks:
//! a writer draining an unbounded frame queue, and a single ordered reader
//! that splits each message into protocol frames and forwards them as
//! [`TransportEvent`]s. The reader always finishes with exactly one
//! [`TransportEvent::Closed`], whatever ended the socket.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::protocol::split_frames;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code recorded when the socket dies without a close handshake.
pub const ABNORMAL_CLOSURE: u16 = 1006;

// ── TransportEvent ───────────────────────────────────────────────────

/// Inbound traffic from the socket, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One protocol frame (terminator already stripped).
    Frame(String),
    /// The socket is gone. Always the last event of a socket.
    Closed { code: u16, reason: String },
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for reconnection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Base delay after an orderly close. Default: 5s.
    pub delay: Duration,

    /// Base delay after an abnormal closure (code 1006). Default: 500ms.
    pub abnormal_delay: Duration,

    /// Upper bound on backoff delay. Default: 60s.
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            abnormal_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl ReconnectConfig {
    /// Delay before reconnect `attempt` (1-based):
    /// `min(base * 2^(attempt - 1), max_delay)`.
    pub fn delay_for(&self, attempt: u32, last_close_code: Option<u16>) -> Duration {
        let base = if last_close_code == Some(ABNORMAL_CLOSURE) {
            self.abnormal_delay
        } else {
            self.delay
        };
        let exponent = attempt.saturating_sub(1).min(20);
        base.saturating_mul(1u32 << exponent).min(self.max_delay)
    }
}

// ── Socket ───────────────────────────────────────────────────────────

/// Handle to an open socket: the outbound frame queue plus its kill switch.
#[derive(Debug)]
pub struct SocketHandle {
    outbound: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl SocketHandle {
    /// Wrap an outbound queue. [`open`] wires it to the websocket writer;
    /// anything else draining the receiver works the same way.
    pub fn new(outbound: mpsc::UnboundedSender<String>, cancel: CancellationToken) -> Self {
        Self { outbound, cancel }
    }

    /// Queue a frame for the writer task.
    pub fn send(&self, frame: String) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::NotConnected);
        }
        self.outbound.send(frame).map_err(|_| Error::NotConnected)
    }

    pub fn is_open(&self) -> bool {
        !self.cancel.is_cancelled() && !self.outbound.is_closed()
    }

    /// Tear the socket down locally. The reader reports the close.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Connect to the bridge and spawn the reader and writer tasks.
pub async fn open(
    url: &Url,
    events: mpsc::UnboundedSender<TransportEvent>,
) -> Result<SocketHandle, Error> {
    tracing::info!(url = %url, "Connecting to bridge");

    let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    tracing::info!("WebSocket connected");

    let (write, read) = ws_stream.split();
    let cancel = CancellationToken::new();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    tokio::spawn(write_loop(write, outbound_rx, cancel.clone()));
    tokio::spawn(read_loop(read, events, cancel.clone()));

    Ok(SocketHandle::new(outbound_tx, cancel))
}

async fn write_loop(
    mut write: SplitSink<WsStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                tracing::trace!(len = frame.len(), "-> frame");
                if let Err(e) = write.send(Message::text(frame)).await {
                    tracing::debug!(error = %e, "WebSocket write failed");
                    cancel.cancel();
                    break;
                }
            }
        }
    }
    tracing::debug!("WebSocket writer exiting");
}

async fn read_loop(
    mut read: SplitStream<WsStream>,
    events: mpsc::UnboundedSender<TransportEvent>,
    cancel: CancellationToken,
) {
    let (code, reason) = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                break (ABNORMAL_CLOSURE, "closed locally".to_owned());
            }
            message = read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => forward_frames(&text, &events),
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => forward_frames(text, &events),
                        Err(e) => tracing::debug!(error = %e, "dropping non-UTF-8 binary message"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        break match frame {
                            Some(cf) => (u16::from(cf.code), cf.reason.to_string()),
                            None => (ABNORMAL_CLOSURE, "close frame without payload".to_owned()),
                        };
                    }
                    Some(Err(e)) => break (ABNORMAL_CLOSURE, e.to_string()),
                    // Stream ended without a close frame
                    None => break (ABNORMAL_CLOSURE, "stream ended".to_owned()),
                    // Ping / Pong / raw frames -- tungstenite answers pings itself
                    Some(Ok(_)) => {}
                }
            }
        }
    };

    cancel.cancel();
    tracing::info!(code, reason = %reason, "WebSocket closed");
    let _ = events.send(TransportEvent::Closed { code, reason });
}

fn forward_frames(text: &str, events: &mpsc::UnboundedSender<TransportEvent>) {
    for frame in split_frames(text) {
        tracing::trace!(len = frame.len(), "<- frame");
        let _ = events.send(TransportEvent::Frame(frame.to_owned()));
    }
}

// ── Tests ────────────────────────────────────────────────────────────
