#![allow(clippy::unwrap_used, dead_code)]
// In-process fake bridge speaking the real protocol over a localhost
// websocket. Drives the handshake on its own, answers discovery requests
// and acknowledges commands; tests inspect what the client sent.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bridgelink_api::crypto;
use bridgelink_api::{ProtocolMessage, ReconnectConfig, SessionKeys};
use bridgelink_core::{BridgeConfig, BridgeEvent};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use rand::rngs::OsRng;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

pub const BRIDGE_ID: &str = "B1";
pub const AUTH_KEY: &str = "secret-key";
const WAIT: Duration = Duration::from_secs(5);

/// How the fake answers control commands and heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandReply {
    Ack,
    Nack,
    Silent,
}

enum Outbound {
    Message(Value),
    Close(Option<CloseFrame>),
}

struct Shared {
    private_key: RsaPrivateKey,
    public_pem: String,
    auth_key: String,
    discovery: Value,
    reply: Mutex<CommandReply>,
    connections: AtomicU32,
    current: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
}

pub struct FakeBridge {
    pub addr: SocketAddr,
    received: mpsc::UnboundedReceiver<ProtocolMessage>,
    shared: Arc<Shared>,
}

pub fn default_discovery() -> Value {
    json!({
        "devices": [
            {"id": 12, "name": "Ceiling", "type": 2, "switch": 0, "dimmvalue": 40},
            {"id": 13, "name": "Floor lamp", "type": 1, "switch": 1},
            {"id": 14, "name": "Blind", "type": 4, "shading": {"position": 100, "runtime": 30}}
        ],
        "rooms": [
            {"id": 3, "name": "Living", "devices": [12, 13]},
            {"id": 4, "name": "Bedroom", "devices": [14]}
        ],
        "last_item": true
    })
}

impl FakeBridge {
    pub async fn start(auth_key: &str) -> Self {
        Self::with_discovery(auth_key, default_discovery()).await
    }

    pub async fn with_discovery(auth_key: &str, discovery: Value) -> Self {
        let private_key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let public_pem = private_key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();
        let shared = Arc::new(Shared {
            private_key,
            public_pem,
            auth_key: auth_key.to_owned(),
            discovery,
            reply: Mutex::new(CommandReply::Ack),
            connections: AtomicU32::new(0),
            current: Mutex::new(None),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (record_tx, received) = mpsc::unbounded_channel();

        let accept_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, Arc::clone(&accept_shared), record_tx.clone()));
            }
        });

        Self {
            addr,
            received,
            shared,
        }
    }

    pub fn connections(&self) -> u32 {
        self.shared.connections.load(Ordering::SeqCst)
    }

    pub async fn set_reply(&self, reply: CommandReply) {
        *self.shared.reply.lock().await = reply;
    }

    /// Send an encrypted message on the current connection.
    pub async fn push(&self, message: Value) {
        if let Some(tx) = self.shared.current.lock().await.as_ref() {
            let _ = tx.send(Outbound::Message(message));
        }
    }

    /// Drop the current connection from the bridge side without a close
    /// code (reported as an abnormal closure).
    pub async fn close(&self) {
        if let Some(tx) = self.shared.current.lock().await.take() {
            let _ = tx.send(Outbound::Close(None));
        }
    }

    /// Close the current connection with a proper close code.
    pub async fn close_with(&self, code: u16, reason: &'static str) {
        if let Some(tx) = self.shared.current.lock().await.take() {
            let frame = CloseFrame {
                code: CloseCode::from(code),
                reason: reason.into(),
            };
            let _ = tx.send(Outbound::Close(Some(frame)));
        }
    }

    /// Next message the client sent with the given type, skipping others.
    pub async fn expect(&mut self, type_int: u16) -> ProtocolMessage {
        tokio::time::timeout(WAIT, async {
            loop {
                let message = self.received.recv().await.unwrap();
                if message.type_int == type_int {
                    return message;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("client never sent type {type_int}"))
    }

    /// Types of everything the client sent, up to and including `last`.
    pub async fn sent_types_until(&mut self, last: u16) -> Vec<u16> {
        tokio::time::timeout(WAIT, async {
            let mut types = Vec::new();
            loop {
                let message = self.received.recv().await.unwrap();
                types.push(message.type_int);
                if message.type_int == last {
                    return types;
                }
            }
        })
        .await
        .unwrap()
    }

    /// Everything the client sent during `window`.
    pub async fn drain_for(&mut self, window: Duration) -> Vec<ProtocolMessage> {
        let mut messages = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Some(message)) =
            tokio::time::timeout_at(deadline, self.received.recv()).await
        {
            messages.push(message);
        }
        messages
    }
}

// ── Per-connection protocol driver ───────────────────────────────────

type Sink = SplitSink<WebSocketStream<TcpStream>, Message>;

async fn serve(
    stream: TcpStream,
    shared: Arc<Shared>,
    record: mpsc::UnboundedSender<ProtocolMessage>,
) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let number = shared.connections.fetch_add(1, Ordering::SeqCst) + 1;
    let (mut write, mut read) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    *shared.current.lock().await = Some(out_tx);

    let mut keys: Option<SessionKeys> = None;
    send(
        &mut write,
        None,
        json!({
            "type_int": 10,
            "payload": {
                "device_id": BRIDGE_ID,
                "connection_id": format!("C{number}"),
                "firmware": "2.1.0"
            }
        }),
    )
    .await;

    loop {
        tokio::select! {
            outbound = out_rx.recv() => match outbound {
                Some(Outbound::Message(message)) => send(&mut write, keys.as_ref(), message).await,
                Some(Outbound::Close(frame)) => {
                    let _ = write.send(Message::Close(frame)).await;
                    break;
                }
                None => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = read.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                for frame in text.split(['\u{4}', '\0']).filter(|f| !f.trim().is_empty()) {
                    let Some(message) = decode(frame, keys.as_ref()) else { continue };
                    let _ = record.send(message.clone());
                    for (reply, encrypted) in respond(&shared, &message, &mut keys).await {
                        let keys = if encrypted { keys.as_ref() } else { None };
                        send(&mut write, keys, reply).await;
                    }
                }
            }
        }
    }
}

fn decode(frame: &str, keys: Option<&SessionKeys>) -> Option<ProtocolMessage> {
    let frame = frame.trim();
    if frame.starts_with('{') {
        return serde_json::from_str(frame).ok();
    }
    let plain = crypto::decrypt_frame(frame, keys?).ok()?;
    serde_json::from_str(&plain).ok()
}

async fn send(write: &mut Sink, keys: Option<&SessionKeys>, message: Value) {
    let json = message.to_string();
    let frame = match keys {
        Some(keys) => crypto::encrypt_frame(&json, keys).unwrap(),
        None => format!("{json}\u{4}"),
    };
    let _ = write.send(Message::text(frame)).await;
}

/// Replies to one client message; `true` marks replies to encrypt.
async fn respond(
    shared: &Shared,
    message: &ProtocolMessage,
    keys: &mut Option<SessionKeys>,
) -> Vec<(Value, bool)> {
    let payload = message.payload.clone().unwrap_or(Value::Null);
    let field = |name: &str| payload.get(name).and_then(Value::as_str).unwrap_or_default();

    match message.type_int {
        11 => vec![(json!({"type_int": 12}), false)],
        14 => vec![(
            json!({"type_int": 15, "payload": {"public_key": shared.public_pem}}),
            false,
        )],
        16 => {
            let wrapped = BASE64.decode(field("secret")).unwrap();
            let secret = shared
                .private_key
                .decrypt(Pkcs1v15Encrypt, &wrapped)
                .unwrap();
            *keys = Some(SessionKeys::from_secret(&String::from_utf8(secret).unwrap()).unwrap());
            vec![(json!({"type_int": 17, "payload": {"sc_id": "S1"}}), true)]
        }
        30 => {
            let expected = crypto::auth_hash(BRIDGE_ID, &shared.auth_key, field("salt"));
            let reply = if field("password") == expected {
                json!({"type_int": 32, "payload": {"token": "T1"}})
            } else {
                json!({"type_int": 32, "payload": {}})
            };
            vec![(reply, true)]
        }
        33 => vec![(json!({"type_int": 34}), true)],
        37 => vec![(json!({"type_int": 38, "payload": {"token": "T2"}}), true)],
        240 => vec![(json!({"type_int": 303, "payload": shared.discovery}), true)],
        2 | 280..=283 => {
            let Some(mc) = message.mc else { return Vec::new() };
            match *shared.reply.lock().await {
                CommandReply::Ack => vec![(json!({"type_int": 1, "ref": mc}), true)],
                CommandReply::Nack => vec![(json!({"type_int": 3, "ref": mc}), true)],
                CommandReply::Silent => Vec::new(),
            }
        }
        _ => Vec::new(),
    }
}

// ── Client-side helpers ──────────────────────────────────────────────

/// Config pointing at the fake, with test-friendly timing.
pub fn config(addr: SocketAddr, auth_key: &str) -> BridgeConfig {
    let mut config = BridgeConfig::new(addr.to_string(), auth_key);
    config.connect_timeout = Duration::from_secs(5);
    config.discovery_poll_interval = Duration::from_millis(20);
    config.coalesce_window = Duration::from_millis(100);
    config.debounce_delay = Duration::from_millis(100);
    config.connection.sc_init_delay = Duration::from_millis(5);
    config.connection.ack_timeout = Duration::from_millis(300);
    config.connection.retry_delay = Duration::from_millis(20);
    config.reconnect = ReconnectConfig {
        delay: Duration::from_millis(50),
        abnormal_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(200),
    };
    config
}

/// Wait for the first event matching `predicate`.
pub async fn wait_for_event(
    events: &mut broadcast::Receiver<BridgeEvent>,
    predicate: impl Fn(&BridgeEvent) -> bool,
) -> BridgeEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            let event = events.recv().await.unwrap();
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .unwrap()
}
