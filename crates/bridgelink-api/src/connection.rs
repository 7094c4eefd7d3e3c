// ── Connection manager ──
//
// Owns the socket, the rolling message counter and the session keys.
// Sends raw or encrypted frames, serializes reliable commands behind a
// single-permit semaphore, correlates ACK/NACK by counter and runs the
// heartbeat.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use tokio::sync::{Mutex, Semaphore, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::crypto::{self, SessionKeys};
use crate::error::Error;
use crate::protocol::{MessageCounter, MessageType, ProtocolMessage, is_plain_frame};
use crate::websocket::{self, SocketHandle, TransportEvent};

// ── ConnectionConfig ─────────────────────────────────────────────

/// Tunables for the connection manager and the handshake.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// How long a reliable send waits for its ACK. Default: 5s.
    pub ack_timeout: Duration,
    /// Retries after the first attempt of a reliable send. Default: 3.
    pub max_retries: u32,
    /// Pause between reliable send attempts. Default: 500ms.
    pub retry_delay: Duration,
    /// Heartbeat period. Default: 30s.
    pub heartbeat_interval: Duration,
    /// Length of the random login salt. Default: 32.
    pub salt_length: usize,
    /// Identity announced in the connection confirm.
    pub client_id: String,
    /// Pause before sending the secure-channel init. Default: 100ms.
    pub sc_init_delay: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(5),
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            heartbeat_interval: Duration::from_secs(30),
            salt_length: 32,
            client_id: "bridgelink".into(),
            sc_init_delay: Duration::from_millis(100),
        }
    }
}

// ── SendReceipt ──────────────────────────────────────────────────

/// What a successful send reports back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReceipt {
    /// Counter the (last) frame went out with.
    pub counter: u16,
    /// Number of attempts it took (1 for plain sends).
    pub attempts: u32,
    pub sent_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AckOutcome {
    Ack,
    Nack,
    ConnectionLost,
}

// ── ConnectionManager ────────────────────────────────────────────

pub struct ConnectionManager {
    config: ConnectionConfig,
    counter: MessageCounter,
    socket: ArcSwapOption<SocketHandle>,
    keys: ArcSwapOption<SessionKeys>,
    pending: DashMap<u16, oneshot::Sender<AckOutcome>>,
    /// Single permit: at most one reliable send in flight.
    send_gate: Semaphore,
    established: watch::Sender<bool>,
    last_sent: watch::Sender<Option<Instant>>,
    last_received: watch::Sender<Option<Instant>>,
    last_close_code: watch::Sender<Option<u16>>,
    reconnecting: AtomicBool,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            counter: MessageCounter::new(),
            socket: ArcSwapOption::empty(),
            keys: ArcSwapOption::empty(),
            pending: DashMap::new(),
            send_gate: Semaphore::new(1),
            established: watch::Sender::new(false),
            last_sent: watch::Sender::new(None),
            last_received: watch::Sender::new(None),
            last_close_code: watch::Sender::new(None),
            reconnecting: AtomicBool::new(false),
            heartbeat: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    // ── Socket lifecycle ─────────────────────────────────────────

    /// Open a websocket to `url` and return its inbound event stream.
    pub async fn open(&self, url: &Url) -> Result<mpsc::UnboundedReceiver<TransportEvent>, Error> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handle = websocket::open(url, events_tx).await?;
        self.attach(handle);
        Ok(events_rx)
    }

    /// Install an already-open socket. Replaces (and closes) any previous one.
    pub fn attach(&self, handle: SocketHandle) {
        if let Some(previous) = self.socket.swap(Some(Arc::new(handle))) {
            previous.close();
        }
        self.last_received.send_replace(Some(Instant::now()));
    }

    pub fn is_open(&self) -> bool {
        self.socket.load_full().is_some_and(|s| s.is_open())
    }

    /// Close the socket locally. The reader still reports the close, so
    /// the normal close path runs.
    pub fn close_socket(&self) {
        if let Some(socket) = self.socket.load_full() {
            debug!("closing socket locally");
            socket.close();
        }
    }

    /// Forget everything about the previous connection: counter back to 1,
    /// no keys, no socket, pending commands failed.
    pub async fn reset(&self) {
        self.stop_heartbeat().await;
        if let Some(socket) = self.socket.swap(None) {
            socket.close();
        }
        self.keys.store(None);
        self.counter.reset();
        self.fail_pending();
        self.established.send_replace(false);
    }

    /// Handle a socket close.
    ///
    /// Fails every pending command with [`Error::ConnectionLost`], drops the
    /// keys and the socket, and stops the heartbeat. Returns `true` when the
    /// caller should schedule a reconnect: the connection had been
    /// established and no reconnect is already in flight.
    pub async fn handle_close(&self, code: u16) -> bool {
        self.stop_heartbeat().await;
        self.socket.store(None);
        self.keys.store(None);
        self.fail_pending();
        self.last_close_code.send_replace(Some(code));
        let was_established = self.established.send_replace(false);
        info!(code, was_established, "connection closed");
        was_established && !self.reconnecting.load(Ordering::Acquire)
    }

    pub fn last_close_code(&self) -> Option<u16> {
        *self.last_close_code.borrow()
    }

    // ── Established / reconnect flags ────────────────────────────

    pub fn mark_established(&self) {
        self.established.send_replace(true);
    }

    pub fn is_established(&self) -> bool {
        *self.established.borrow()
    }

    /// Claim the reconnect slot. Returns `false` if a reconnect is
    /// already in flight.
    pub fn begin_reconnect(&self) -> bool {
        self.reconnecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn end_reconnect(&self) {
        self.reconnecting.store(false, Ordering::Release);
    }

    // ── Session timing ───────────────────────────────────────────

    pub fn last_sent(&self) -> Option<Instant> {
        *self.last_sent.borrow()
    }

    pub fn last_received(&self) -> Option<Instant> {
        *self.last_received.borrow()
    }

    // ── Encryption context ───────────────────────────────────────

    pub fn install_keys(&self, keys: SessionKeys) {
        self.keys.store(Some(Arc::new(keys)));
    }

    pub fn has_keys(&self) -> bool {
        self.keys.load().is_some()
    }

    // ── Sending ──────────────────────────────────────────────────

    /// Send a plain JSON frame (pre-handshake traffic).
    pub fn send_raw(&self, message: ProtocolMessage) -> Result<SendReceipt, Error> {
        self.transmit(message, false)
    }

    /// Send an encrypted frame without waiting for an ACK.
    pub fn send_encrypted(&self, message: ProtocolMessage) -> Result<SendReceipt, Error> {
        self.transmit(message, true)
    }

    fn transmit(&self, mut message: ProtocolMessage, encrypt: bool) -> Result<SendReceipt, Error> {
        let socket = self.socket.load_full().ok_or(Error::NotConnected)?;
        let counter = *message.mc.get_or_insert_with(|| self.counter.next());
        let json = serde_json::to_string(&message)?;

        let frame = if encrypt {
            let keys = self.keys.load_full().ok_or(Error::NoEncryptionContext)?;
            crypto::encrypt_frame(&json, &keys)?
        } else {
            json
        };

        socket.send(frame)?;
        let sent_at = Instant::now();
        self.last_sent.send_replace(Some(sent_at));
        trace!(kind = %message.kind(), counter, encrypt, "sent");

        Ok(SendReceipt {
            counter,
            attempts: 1,
            sent_at,
        })
    }

    /// Send an encrypted command and wait for the bridge to ACK it.
    ///
    /// Reliable sends are serialized. Each attempt goes out with a fresh
    /// counter; transient failures (NACK, timeout, socket not open) are
    /// retried up to `max_retries` times. A connection loss fails
    /// immediately.
    pub async fn send_with_retry(&self, message: ProtocolMessage) -> Result<SendReceipt, Error> {
        let _permit = self
            .send_gate
            .acquire()
            .await
            .map_err(|_| Error::NotConnected)?;

        let max_attempts = self.config.max_retries.saturating_add(1);
        let mut attempt = 1;
        loop {
            match self.send_awaiting_ack(message.clone()).await {
                Ok(receipt) => {
                    return Ok(SendReceipt {
                        attempts: attempt,
                        ..receipt
                    });
                }
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if attempt < max_attempts => {
                    warn!(attempt, error = %e, "command not acknowledged, retrying");
                    tokio::time::sleep(self.config.retry_delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(attempts = attempt, error = %e, "command failed");
                    return Err(Error::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
            }
        }
    }

    async fn send_awaiting_ack(&self, mut message: ProtocolMessage) -> Result<SendReceipt, Error> {
        let counter = self.counter.next();
        message.mc = Some(counter);

        // Registered before sending so a fast ACK cannot be missed.
        let (tx, rx) = oneshot::channel();
        self.pending.insert(counter, tx);

        let receipt = match self.send_encrypted(message) {
            Ok(receipt) => receipt,
            Err(e) => {
                self.pending.remove(&counter);
                return Err(e);
            }
        };

        match tokio::time::timeout(self.config.ack_timeout, rx).await {
            Ok(Ok(AckOutcome::Ack)) => Ok(receipt),
            Ok(Ok(AckOutcome::Nack)) => Err(Error::Nack { counter }),
            Ok(Ok(AckOutcome::ConnectionLost) | Err(_)) => Err(Error::ConnectionLost),
            Err(_elapsed) => {
                self.pending.remove(&counter);
                Err(Error::AckTimeout {
                    counter,
                    timeout_ms: u64::try_from(self.config.ack_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                })
            }
        }
    }

    // ── Acknowledgements ─────────────────────────────────────────

    /// Resolve the pending command with this counter. Returns `false` for
    /// an ACK nobody is waiting for.
    pub fn handle_ack(&self, counter: u16) -> bool {
        self.resolve(counter, AckOutcome::Ack)
    }

    pub fn handle_nack(&self, counter: u16) -> bool {
        self.resolve(counter, AckOutcome::Nack)
    }

    fn resolve(&self, counter: u16, outcome: AckOutcome) -> bool {
        match self.pending.remove(&counter) {
            Some((_, tx)) => {
                let _ = tx.send(outcome);
                true
            }
            None => {
                trace!(counter, ?outcome, "no pending command for counter");
                false
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn fail_pending(&self) {
        let counters: Vec<u16> = self.pending.iter().map(|entry| *entry.key()).collect();
        for counter in counters {
            if let Some((_, tx)) = self.pending.remove(&counter) {
                let _ = tx.send(AckOutcome::ConnectionLost);
            }
        }
    }

    // ── Inbound frames ───────────────────────────────────────────

    /// Turn one inbound frame into an envelope: plain JSON as-is,
    /// anything else through the session keys.
    pub fn decode_frame(&self, frame: &str) -> Result<ProtocolMessage, Error> {
        self.last_received.send_replace(Some(Instant::now()));

        if is_plain_frame(frame) {
            return Ok(serde_json::from_str(frame)?);
        }
        let keys = self.keys.load_full().ok_or(Error::NoEncryptionContext)?;
        let json = crypto::decrypt_frame(frame, &keys)?;
        Ok(serde_json::from_str(&json)?)
    }

    // ── Heartbeat ────────────────────────────────────────────────

    /// (Re)start the heartbeat: an encrypted HEARTBEAT every
    /// `heartbeat_interval` while the socket is open.
    pub async fn start_heartbeat(self: &Arc<Self>, cancel: CancellationToken) {
        let mut slot = self.heartbeat.lock().await;
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        let period = self.config.heartbeat_interval;
        let manager = Arc::downgrade(self);
        *slot = Some(tokio::spawn(heartbeat_task(manager, period, cancel)));
        debug!(?period, "heartbeat started");
    }

    pub async fn stop_heartbeat(&self) {
        if let Some(handle) = self.heartbeat.lock().await.take() {
            handle.abort();
        }
    }

    pub async fn heartbeat_running(&self) -> bool {
        self.heartbeat
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

async fn heartbeat_task(manager: Weak<ConnectionManager>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(manager) = manager.upgrade() else { break };
                if !manager.is_open() {
                    break;
                }
                if let Err(e) = manager.send_encrypted(ProtocolMessage::new(MessageType::Heartbeat)) {
                    warn!(error = %e, "heartbeat send failed");
                    break;
                }
            }
        }
    }
    debug!("heartbeat stopped");
}

// ── Tests ────────────────────────────────────────────────────────
