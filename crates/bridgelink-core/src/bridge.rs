// ── Bridge facade ──
//
// Full lifecycle management for one bridge connection: socket, handshake,
// discovery, heartbeat, watchdog and automatic reconnect. Consumers see
// the stores, lifecycle events and the control operations.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use bridgelink_api::{
    ABNORMAL_CLOSURE, AuthProgress, Authenticator, ConnectionManager, ParsedMessage,
    TransportEvent,
};
use dashmap::DashMap;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::command::{Command, CommandDebouncer, Debounced, RoomOperation, scale_dim_value};
use crate::config::BridgeConfig;
use crate::error::CoreError;
use crate::event::BridgeEvent;
use crate::handler::MessageHandler;
use crate::model::{Device, DeviceState, Room, RoomState};
use crate::store::{DeviceStore, ListenerId, RoomStore};

const EVENT_CHANNEL_SIZE: usize = 256;
const NORMAL_CLOSURE: u16 = 1000;
/// Silence longer than this many heartbeat periods trips the watchdog.
const WATCHDOG_MISSED_BEATS: u32 = 3;

// ── ConnectionState ──────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    Reconnecting { attempt: u32 },
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Authenticating => f.write_str("authenticating"),
            Self::Connected => f.write_str("connected"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

// ── Bridge ───────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<BridgeInner>`. One `Bridge` drives exactly
/// one logical connection; after [`connect()`](Self::connect) succeeds it
/// keeps itself connected until [`disconnect()`](Self::disconnect).
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    config: BridgeConfig,
    conn: Arc<ConnectionManager>,
    devices: Arc<DeviceStore>,
    rooms: Arc<RoomStore>,
    handler: MessageHandler,
    connection_state: watch::Sender<ConnectionState>,
    event_tx: broadcast::Sender<BridgeEvent>,
    cancel: CancellationToken,
    /// Child token for the current connection: cancelled on teardown,
    /// replaced on every attempt.
    cancel_child: Mutex<CancellationToken>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    debouncers: DashMap<String, Arc<CommandDebouncer>>,
    manual_disconnect: AtomicBool,
    reconnect_attempt: AtomicU32,
    /// Reason of a permanent authentication failure in the current attempt.
    auth_failure: watch::Sender<Option<String>>,
}

impl Bridge {
    /// Create a new Bridge from configuration. Does NOT connect.
    pub fn new(config: BridgeConfig) -> Self {
        let conn = Arc::new(ConnectionManager::new(config.connection.clone()));
        let devices = Arc::new(DeviceStore::new());
        let rooms = Arc::new(RoomStore::new());
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let handler = MessageHandler::new(
            Arc::clone(&conn),
            Arc::clone(&devices),
            Arc::clone(&rooms),
            config.coalesce_window,
            event_tx.clone(),
        );
        let cancel = CancellationToken::new();
        let cancel_child = cancel.child_token();

        Self {
            inner: Arc::new(BridgeInner {
                config,
                conn,
                devices,
                rooms,
                handler,
                connection_state: watch::Sender::new(ConnectionState::Disconnected),
                event_tx,
                cancel,
                cancel_child: Mutex::new(cancel_child),
                task_handles: Mutex::new(Vec::new()),
                reconnect_task: Mutex::new(None),
                debouncers: DashMap::new(),
                manual_disconnect: AtomicBool::new(false),
                reconnect_attempt: AtomicU32::new(0),
                auth_failure: watch::Sender::new(None),
            }),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    // ── Connection lifecycle ─────────────────────────────────────

    /// Connect, authenticate and wait for the device list.
    ///
    /// Fails with [`CoreError::Timeout`] if discovery does not complete
    /// within the configured connect timeout.
    pub async fn connect(&self) -> Result<(), CoreError> {
        self.inner.manual_disconnect.store(false, Ordering::Release);
        if let Some(handle) = self.inner.reconnect_task.lock().await.take() {
            handle.abort();
        }
        self.inner.conn.end_reconnect();
        self.inner.reconnect_attempt.store(0, Ordering::Release);
        self.set_state(ConnectionState::Connecting);
        self.establish().await
    }

    /// Tear the connection down and disable automatic reconnect.
    ///
    /// Heartbeat, watchdog and any scheduled reconnect are stopped before
    /// the socket is closed. Known devices and rooms stay readable.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        inner.manual_disconnect.store(true, Ordering::Release);

        if let Some(handle) = inner.reconnect_task.lock().await.take() {
            handle.abort();
        }
        inner.cancel_child.lock().await.cancel();
        self.abort_tasks().await;

        inner.conn.end_reconnect();
        inner.conn.reset().await;
        inner.handler.clear_pending();

        self.set_state(ConnectionState::Disconnected);
        self.emit(BridgeEvent::Disconnected {
            code: NORMAL_CLOSURE,
            reason: "disconnected by client".into(),
        });
        info!("disconnected");
    }

    /// One-shot: connect, run closure, disconnect.
    pub async fn oneshot<F, Fut, T>(config: BridgeConfig, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(Bridge) -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let bridge = Bridge::new(config);
        if let Err(e) = bridge.connect().await {
            bridge.disconnect().await;
            return Err(e);
        }
        let result = f(bridge.clone()).await;
        bridge.disconnect().await;
        result
    }

    /// One connection attempt, from a clean slate to "device list loaded".
    async fn establish(&self) -> Result<(), CoreError> {
        let inner = &self.inner;
        let url = inner.config.url()?;

        let child = {
            let mut guard = inner.cancel_child.lock().await;
            guard.cancel();
            *guard = inner.cancel.child_token();
            guard.clone()
        };
        self.abort_tasks().await;
        inner.conn.reset().await;
        inner.handler.reset();
        inner.auth_failure.send_replace(None);

        // One deadline covers the socket upgrade, the handshake and discovery.
        let timeout = inner.config.connect_timeout;
        let deadline = Instant::now() + timeout;
        let timed_out = || CoreError::Timeout {
            timeout_secs: timeout.as_secs(),
        };

        let events = match tokio::time::timeout_at(deadline, inner.conn.open(&url)).await {
            Ok(Ok(events)) => events,
            Ok(Err(e)) => {
                self.set_state(ConnectionState::Failed);
                return Err(CoreError::ConnectionFailed {
                    host: inner.config.host.clone(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                warn!(host = %inner.config.host, "websocket upgrade timed out");
                self.set_state(ConnectionState::Failed);
                return Err(timed_out());
            }
        };

        self.set_state(ConnectionState::Authenticating);
        let session = tokio::spawn(session_task(self.clone(), events, child.clone()));
        inner.task_handles.lock().await.push(session);

        let outcome = match tokio::time::timeout_at(deadline, self.wait_until_ready()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(timed_out()),
        };
        if let Err(e) = outcome {
            warn!(error = %e, "connection attempt failed");
            child.cancel();
            self.abort_tasks().await;
            inner.conn.reset().await;
            self.set_state(ConnectionState::Failed);
            return Err(e);
        }

        inner.conn.end_reconnect();
        inner.conn.mark_established();
        inner.conn.start_heartbeat(child.clone()).await;
        let watchdog = tokio::spawn(watchdog_task(self.clone(), child));
        inner.task_handles.lock().await.push(watchdog);

        inner.reconnect_attempt.store(0, Ordering::Release);
        self.set_state(ConnectionState::Connected);
        self.emit(BridgeEvent::Connected);
        info!(
            devices = inner.devices.len(),
            rooms = inner.rooms.len(),
            "connected to bridge"
        );
        Ok(())
    }

    /// Resolve once discovery completed; fail early on a permanent auth
    /// failure or a socket that died during the handshake.
    async fn wait_until_ready(&self) -> Result<(), CoreError> {
        let inner = &self.inner;
        let mut ready = inner.handler.devices_ready();
        let mut poll = tokio::time::interval(inner.config.discovery_poll_interval);

        loop {
            if *ready.borrow_and_update() {
                return Ok(());
            }
            if let Some(message) = inner.auth_failure.borrow().clone() {
                return Err(CoreError::AuthenticationFailed { message });
            }
            if !inner.conn.is_open() {
                return Err(CoreError::ConnectionFailed {
                    host: inner.config.host.clone(),
                    reason: "socket closed during handshake".into(),
                });
            }

            tokio::select! {
                changed = ready.changed() => {
                    if changed.is_err() {
                        return Err(CoreError::Internal("readiness channel closed".into()));
                    }
                }
                _ = poll.tick() => {}
            }
        }
    }

    /// Cancel-and-abort every per-connection task.
    async fn abort_tasks(&self) {
        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            handle.abort();
        }
    }

    // ── Session ──────────────────────────────────────────────────

    async fn process_frame(&self, auth: &mut Authenticator, frame: &str) {
        let inner = &self.inner;
        let message = match inner.conn.decode_frame(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "undecodable frame dropped");
                return;
            }
        };
        trace!(kind = %message.kind(), mc = ?message.mc, "<- message");

        let parsed = match ParsedMessage::try_from(message) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "malformed message dropped");
                return;
            }
        };

        if let ParsedMessage::ConnectionStart { info, .. } = &parsed {
            self.emit(BridgeEvent::AppInfo(info.clone()));
        }

        if auth.is_authenticated() {
            inner.handler.handle(parsed);
            return;
        }

        match auth.handle(&inner.conn, &parsed).await {
            Ok(AuthProgress::Pending) => {}
            Ok(AuthProgress::Authenticated) => {
                info!(bridge = auth.bridge_device_id().unwrap_or("?"), "authenticated");
                self.emit(BridgeEvent::Authenticated);
                if let Err(e) = self.request_device_states() {
                    warn!(error = %e, "device request failed");
                }
            }
            Ok(AuthProgress::Ignored) => inner.handler.handle(parsed),
            Err(e) if e.is_auth_failure() => {
                let reason = e.to_string();
                error!(reason = %reason, "authentication failed");
                inner.auth_failure.send_replace(Some(reason.clone()));
                self.emit(BridgeEvent::AuthFailed { reason });
                inner.conn.close_socket();
            }
            Err(e) => warn!(error = %e, state = ?auth.state(), "handshake step failed"),
        }
    }

    async fn on_socket_closed(&self, code: u16, reason: String) {
        let inner = &self.inner;
        let should_reconnect = inner.conn.handle_close(code).await;
        inner.handler.clear_pending();
        self.emit(BridgeEvent::Disconnected { code, reason });

        if inner.manual_disconnect.load(Ordering::Acquire) || !should_reconnect {
            return;
        }
        if !inner.conn.begin_reconnect() {
            debug!("reconnect already in flight");
            return;
        }
        let handle = tokio::spawn(reconnect_task(self.clone()));
        if let Some(previous) = inner.reconnect_task.lock().await.replace(handle) {
            previous.abort();
        }
    }

    // ── Control operations ───────────────────────────────────────

    /// Send a command and wait for the bridge to acknowledge it.
    pub async fn execute(&self, command: Command) -> Result<(), CoreError> {
        if !self.inner.conn.is_established() {
            return Err(CoreError::BridgeDisconnected);
        }
        let message = command.to_message()?;
        let receipt = self.inner.conn.send_with_retry(message).await?;
        debug!(
            command = ?command,
            counter = receipt.counter,
            attempts = receipt.attempts,
            "command acknowledged"
        );
        Ok(())
    }

    /// Switch a device on or off. Dims still waiting out their debounce
    /// window for this device are dropped.
    pub async fn switch_device(&self, id: &str, on: bool) -> Result<(), CoreError> {
        self.require_device(id)?;
        if let Some(debouncer) = self.inner.debouncers.get(id) {
            debouncer.supersede();
        }
        self.execute(Command::SwitchDevice {
            id: id.to_owned(),
            on,
        })
        .await
    }

    /// Dim a device. Values at or below zero switch it off; fractions in
    /// `(0, 1]` are scaled to the bridge's 1..=99 range.
    ///
    /// Rapid calls for the same device collapse into the last one; the
    /// superseded calls return `Ok(())` without sending anything. A
    /// switch-off supersedes dims still pending for the device.
    pub async fn dim_device(&self, id: &str, value: f64) -> Result<(), CoreError> {
        let Some(level) = scale_dim_value(value) else {
            return self.switch_device(id, false).await;
        };
        self.require_device(id)?;

        let debouncer = self.debouncer(id);
        let command = Command::DimDevice {
            id: id.to_owned(),
            level,
        };
        match debouncer.run(|| self.execute(command)).await {
            Debounced::Executed(result) => result,
            Debounced::Superseded => {
                debug!(device = id, level, "dim superseded by a newer request");
                Ok(())
            }
        }
    }

    /// Switch or dim every device of a room.
    ///
    /// Dimming requires at least one dimmable member.
    pub async fn control_room(
        &self,
        id: &str,
        operation: RoomOperation,
        value: f64,
    ) -> Result<(), CoreError> {
        let room = self
            .inner
            .rooms
            .get(id)
            .ok_or_else(|| CoreError::RoomNotFound {
                identifier: id.to_owned(),
            })?;

        let command = match operation {
            RoomOperation::Switch => Command::SwitchRoom {
                id: id.to_owned(),
                on: value > 0.0,
            },
            RoomOperation::Dim => {
                let dimmable = room
                    .devices
                    .iter()
                    .filter_map(|member| self.inner.devices.get(member))
                    .any(|device| device.capabilities.dimmable);
                if !dimmable {
                    warn!(room = id, "room has no dimmable device");
                    return Err(CoreError::Unsupported {
                        operation: format!("dim room '{}'", room.name),
                        required: "at least one dimmable device".into(),
                    });
                }
                match scale_dim_value(value) {
                    Some(level) => Command::DimRoom {
                        id: id.to_owned(),
                        level,
                    },
                    None => Command::SwitchRoom {
                        id: id.to_owned(),
                        on: false,
                    },
                }
            }
        };
        self.execute(command).await
    }

    /// Ask the bridge for a fresh device and room snapshot.
    ///
    /// Fire-and-forget: the answer arrives as discovery messages.
    pub fn request_device_states(&self) -> Result<(), CoreError> {
        for command in [Command::RequestDevices, Command::RequestRooms] {
            self.inner.conn.send_encrypted(command.to_message()?)?;
        }
        Ok(())
    }

    fn require_device(&self, id: &str) -> Result<(), CoreError> {
        if self.inner.devices.contains(id) {
            Ok(())
        } else {
            Err(CoreError::DeviceNotFound {
                identifier: id.to_owned(),
            })
        }
    }

    fn debouncer(&self, id: &str) -> Arc<CommandDebouncer> {
        let delay = self.inner.config.debounce_delay;
        Arc::clone(
            self.inner
                .debouncers
                .entry(id.to_owned())
                .or_insert_with(|| Arc::new(CommandDebouncer::new(delay)))
                .value(),
        )
    }

    // ── State observation ────────────────────────────────────────

    /// Subscribe to connection state changes.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.connection_state.borrow() == ConnectionState::Connected
    }

    /// Subscribe to lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<BridgeEvent> {
        self.inner.event_tx.subscribe()
    }

    // ── Snapshot accessors ───────────────────────────────────────

    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.inner.devices.all()
    }

    pub fn device(&self, id: &str) -> Option<Arc<Device>> {
        self.inner.devices.get(id)
    }

    pub fn rooms(&self) -> Vec<Arc<Room>> {
        self.inner.rooms.all()
    }

    pub fn room(&self, id: &str) -> Option<Arc<Room>> {
        self.inner.rooms.get(id)
    }

    /// Watch the full device list.
    pub fn subscribe_devices(&self) -> watch::Receiver<Arc<Vec<Arc<Device>>>> {
        self.inner.devices.subscribe()
    }

    pub fn subscribe_rooms(&self) -> watch::Receiver<Arc<Vec<Arc<Room>>>> {
        self.inner.rooms.subscribe()
    }

    // ── Listeners ────────────────────────────────────────────────

    pub fn add_device_listener<F>(&self, id: &str, listener: F) -> ListenerId
    where
        F: Fn(&DeviceState) + Send + Sync + 'static,
    {
        self.inner.devices.add_listener(id, listener)
    }

    pub fn remove_device_listener(&self, id: &str, listener: ListenerId) -> bool {
        self.inner.devices.remove_listener(id, listener)
    }

    pub fn add_room_listener<F>(&self, id: &str, listener: F) -> ListenerId
    where
        F: Fn(&RoomState) + Send + Sync + 'static,
    {
        self.inner.rooms.add_listener(id, listener)
    }

    pub fn remove_room_listener(&self, id: &str, listener: ListenerId) -> bool {
        self.inner.rooms.remove_listener(id, listener)
    }

    // ── Private helpers ──────────────────────────────────────────

    fn set_state(&self, state: ConnectionState) {
        debug!(%state, "connection state");
        self.inner.connection_state.send_replace(state);
    }

    fn emit(&self, event: BridgeEvent) {
        trace!(event = event.name(), "emit");
        let _ = self.inner.event_tx.send(event);
    }
}

// ── Background tasks ─────────────────────────────────────────────

/// Single ordered reader for one socket: handshake first, then routing.
async fn session_task(
    bridge: Bridge,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    cancel: CancellationToken,
) {
    let mut auth = Authenticator::new(bridge.inner.config.auth_key.clone());

    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Some(TransportEvent::Frame(frame)) => bridge.process_frame(&mut auth, &frame).await,
            Some(TransportEvent::Closed { code, reason }) => {
                bridge.on_socket_closed(code, reason).await;
                break;
            }
            None => break,
        }
    }
    debug!("session task exiting");
}

/// Reconnect with exponential backoff until it succeeds, the key is
/// rejected, or the user disconnects.
///
/// Boxed: it closes the session -> reconnect -> establish spawn cycle,
/// which `Send` inference cannot resolve through opaque futures.
fn reconnect_task(bridge: Bridge) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        let inner = &bridge.inner;

        loop {
            if inner.manual_disconnect.load(Ordering::Acquire) {
                break;
            }
            let attempt = inner.reconnect_attempt.fetch_add(1, Ordering::AcqRel) + 1;
            let delay = inner
                .config
                .reconnect
                .delay_for(attempt, inner.conn.last_close_code());

            info!(attempt, delay_ms = millis(delay), "reconnect scheduled");
            bridge.set_state(ConnectionState::Reconnecting { attempt });
            bridge.emit(BridgeEvent::Reconnecting { attempt, delay });

            tokio::select! {
                biased;
                () = inner.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
            if inner.manual_disconnect.load(Ordering::Acquire) {
                break;
            }

            match bridge.establish().await {
                Ok(()) => {
                    info!(attempt, "reconnected");
                    break;
                }
                Err(CoreError::AuthenticationFailed { message }) => {
                    error!(attempt, reason = %message, "auth key rejected, giving up");
                    bridge.set_state(ConnectionState::Failed);
                    break;
                }
                Err(e) => warn!(attempt, error = %e, "reconnect attempt failed"),
            }
        }

        inner.conn.end_reconnect();
    })
}

/// Periodic liveness check: force a reconnect after prolonged silence and
/// restart a heartbeat that died.
async fn watchdog_task(bridge: Bridge, cancel: CancellationToken) {
    let inner = &bridge.inner;
    let period = inner.conn.config().heartbeat_interval;
    let silence_limit = period * WATCHDOG_MISSED_BEATS;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if !inner.conn.is_established() {
                    continue;
                }
                if !inner.conn.is_open() {
                    warn!("socket gone without a close event");
                    bridge
                        .on_socket_closed(ABNORMAL_CLOSURE, "socket lost".into())
                        .await;
                    continue;
                }

                let silent_for = inner
                    .conn
                    .last_received()
                    .map(|at| at.elapsed());
                if silent_for.is_some_and(|silence| silence > silence_limit) {
                    warn!(
                        silent_ms = silent_for.map(millis),
                        limit_ms = millis(silence_limit),
                        "no traffic from bridge, forcing reconnect"
                    );
                    inner.conn.close_socket();
                    continue;
                }

                if !inner.conn.heartbeat_running().await {
                    warn!("heartbeat stopped, restarting");
                    inner.conn.start_heartbeat(cancel.clone()).await;
                }
            }
        }
    }
}

#[allow(clippy::as_conversions, clippy::cast_possible_truncation)]
fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bridgelink_api::{SessionKeys, SocketHandle};

    const BEAT: Duration = Duration::from_secs(10);

    /// A bridge whose connection counts as established over an in-memory
    /// socket; frames it sends show up on the returned receiver.
    fn established_bridge() -> (Bridge, mpsc::UnboundedReceiver<String>) {
        let mut config = BridgeConfig::new("127.0.0.1:1", "key");
        config.connection.heartbeat_interval = BEAT;
        let bridge = Bridge::new(config);
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = &bridge.inner.conn;
        conn.attach(SocketHandle::new(tx, CancellationToken::new()));
        conn.install_keys(SessionKeys::generate());
        conn.mark_established();
        (bridge, rx)
    }

    #[test]
    fn connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(
            ConnectionState::Reconnecting { attempt: 2 }.to_string(),
            "reconnecting (attempt 2)"
        );
    }

    #[tokio::test]
    async fn commands_require_an_established_connection() {
        let bridge = Bridge::new(BridgeConfig::new("127.0.0.1:1", "key"));
        assert!(matches!(
            bridge.execute(Command::RequestDevices).await,
            Err(CoreError::BridgeDisconnected)
        ));
        assert!(matches!(
            bridge.switch_device("12", true).await,
            Err(CoreError::DeviceNotFound { .. })
        ));
        assert!(matches!(
            bridge.control_room("3", RoomOperation::Switch, 1.0).await,
            Err(CoreError::RoomNotFound { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_restarts_a_dead_heartbeat() {
        let (bridge, mut frames) = established_bridge();
        let cancel = CancellationToken::new();
        assert!(!bridge.inner.conn.heartbeat_running().await);

        tokio::spawn(watchdog_task(bridge.clone(), cancel.clone()));
        tokio::time::sleep(BEAT + BEAT / 2).await;
        assert!(bridge.inner.conn.heartbeat_running().await);

        tokio::time::sleep(BEAT).await;
        assert!(frames.try_recv().is_ok(), "restarted heartbeat sends nothing");
        assert!(bridge.inner.conn.is_open());
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_closes_a_silent_socket() {
        let (bridge, _frames) = established_bridge();
        let cancel = CancellationToken::new();
        tokio::spawn(watchdog_task(bridge.clone(), cancel.clone()));

        // Three beats of silence are tolerated, the fourth is not.
        tokio::time::sleep(BEAT * 3 + BEAT / 2).await;
        assert!(bridge.inner.conn.is_open());
        tokio::time::sleep(BEAT).await;
        assert!(!bridge.inner.conn.is_open());
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_ignores_a_connection_not_yet_established() {
        let (bridge, _frames) = established_bridge();
        bridge.inner.conn.reset().await;
        let (tx, _rx) = mpsc::unbounded_channel();
        bridge
            .inner
            .conn
            .attach(SocketHandle::new(tx, CancellationToken::new()));
        let cancel = CancellationToken::new();
        tokio::spawn(watchdog_task(bridge.clone(), cancel.clone()));

        tokio::time::sleep(BEAT * 5).await;
        assert!(bridge.inner.conn.is_open());
        assert!(!bridge.inner.conn.heartbeat_running().await);
        cancel.cancel();
    }

    #[tokio::test]
    async fn unreachable_bridge_fails_to_connect() {
        let bridge = Bridge::new(BridgeConfig::new("127.0.0.1:1", "key"));
        let result = bridge.connect().await;
        assert!(matches!(result, Err(CoreError::ConnectionFailed { .. })));
        assert_eq!(*bridge.connection_state().borrow(), ConnectionState::Failed);
    }
}
