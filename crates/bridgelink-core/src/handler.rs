// ── Post-authentication message routing ──
//
// Routes validated inbound messages into the connection manager (ACK/NACK,
// heartbeat probes) and the entity stores (discovery snapshots, state
// deltas). State deltas are applied to the stores immediately; listener
// dispatch goes through the per-kind coalescers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use bridgelink_api::{ConnectionManager, ParsedMessage, ProtocolMessage};
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, trace, warn};

use crate::convert::{self, DiscoveryPayload, StateUpdatePayload};
use crate::event::BridgeEvent;
use crate::model::{DeviceState, Merge, RoomState};
use crate::store::coalesce::Coalescer;
use crate::store::{DeviceStore, RoomStore};

pub(crate) struct MessageHandler {
    conn: Arc<ConnectionManager>,
    devices: Arc<DeviceStore>,
    rooms: Arc<RoomStore>,
    device_updates: Coalescer<DeviceState>,
    room_updates: Coalescer<RoomState>,
    event_tx: broadcast::Sender<BridgeEvent>,
    devices_ready: watch::Sender<bool>,
}

impl MessageHandler {
    pub(crate) fn new(
        conn: Arc<ConnectionManager>,
        devices: Arc<DeviceStore>,
        rooms: Arc<RoomStore>,
        coalesce_window: Duration,
        event_tx: broadcast::Sender<BridgeEvent>,
    ) -> Self {
        Self {
            conn,
            devices,
            rooms,
            device_updates: Coalescer::new(coalesce_window),
            room_updates: Coalescer::new(coalesce_window),
            event_tx,
            devices_ready: watch::Sender::new(false),
        }
    }

    /// Watch the one-shot "device list ready" flag.
    pub(crate) fn devices_ready(&self) -> watch::Receiver<bool> {
        self.devices_ready.subscribe()
    }

    /// Forget the previous session: stores emptied, readiness cleared,
    /// buffered updates dropped.
    pub(crate) fn reset(&self) {
        self.clear_pending();
        self.devices.clear();
        self.rooms.clear();
        self.devices_ready.send_replace(false);
    }

    /// Drop coalesced updates that have not been dispatched yet.
    pub(crate) fn clear_pending(&self) {
        self.device_updates.clear();
        self.room_updates.clear();
    }

    pub(crate) fn handle(&self, message: ParsedMessage) {
        match message {
            ParsedMessage::Ack { counter } => {
                self.conn.handle_ack(counter);
            }
            ParsedMessage::Nack { counter } => {
                warn!(counter, "bridge rejected command");
                self.conn.handle_nack(counter);
            }
            ParsedMessage::Heartbeat { counter } => self.answer_heartbeat(counter),
            ParsedMessage::Discovery { payload } => self.handle_discovery(&payload),
            ParsedMessage::StateUpdate { payload } => self.handle_state_update(&payload),
            ParsedMessage::ErrorInfo { payload } => {
                warn!(%payload, "bridge reported an error");
                let _ = self.event_tx.send(BridgeEvent::Error {
                    message: error_message(&payload),
                });
            }
            ParsedMessage::BridgeState { payload } => {
                debug!(%payload, "bridge status");
                let _ = self.event_tx.send(BridgeEvent::BridgeStatus(payload));
            }
            ParsedMessage::Other { kind, .. } => trace!(%kind, "unhandled message"),
            other => debug!(?other, "handshake message after authentication, ignored"),
        }
    }

    fn answer_heartbeat(&self, counter: Option<u16>) {
        let Some(counter) = counter else { return };
        if let Err(e) = self.conn.send_encrypted(ProtocolMessage::ack(counter)) {
            debug!(error = %e, "could not acknowledge heartbeat");
        }
    }

    // ── Discovery ────────────────────────────────────────────────────

    fn handle_discovery(&self, payload: &Value) {
        let discovery: DiscoveryPayload = convert::decode_payload(payload);

        for entry in &discovery.devices {
            let Some(device) = convert::device_from_discovery(entry) else {
                warn!(%entry, "discovery device without id, skipped");
                continue;
            };
            let id = device.id.clone();
            let state = device.state.clone();
            self.devices.upsert(device);
            // Dispatch runs on its own task, after the entity is registered.
            if !state.is_empty() {
                self.devices.trigger_listeners(&id, state);
            }
        }

        for entry in &discovery.rooms {
            let Some(room) = convert::room_from_discovery(entry) else {
                warn!(%entry, "discovery room without id, skipped");
                continue;
            };
            let id = room.id.clone();
            let state = room.state.clone();
            self.rooms.upsert(room);
            if !state.is_empty() {
                self.rooms.trigger_listeners(&id, state);
            }
        }

        debug!(
            devices = discovery.devices.len(),
            rooms = discovery.rooms.len(),
            last = discovery.is_last(),
            "discovery snapshot"
        );

        if discovery.is_last() && !*self.devices_ready.borrow() {
            self.devices_ready.send_replace(true);
            let (devices, rooms) = (self.devices.len(), self.rooms.len());
            info!(devices, rooms, "device list loaded");
            let _ = self
                .event_tx
                .send(BridgeEvent::DevicesLoaded { devices, rooms });
        }
    }

    // ── State updates ────────────────────────────────────────────────

    fn handle_state_update(&self, payload: &Value) {
        let update: StateUpdatePayload = convert::decode_payload(payload);

        // Group per id, in batch order.
        let mut device_batch: HashMap<String, DeviceState> = HashMap::new();
        for entry in &update.devices {
            let Some(id) = self.resolve_device_id(entry) else {
                continue;
            };
            let state = convert::device_state(entry);
            if state.is_empty() {
                continue;
            }
            device_batch.entry(id).or_default().merge(&state);
        }

        let mut room_batch: HashMap<String, RoomState> = HashMap::new();
        for entry in &update.rooms {
            let Some(id) = entry.get("id").and_then(convert::parse_id) else {
                warn!(%entry, "room update without id, dropped");
                continue;
            };
            let state = convert::room_state(entry);
            if state.is_empty() {
                continue;
            }
            room_batch.entry(id).or_default().merge(&state);
        }

        // A room switch reaches members the bridge did not echo itself.
        let explicit: HashSet<String> = device_batch
            .iter()
            .filter(|(_, state)| state.switch.is_some())
            .map(|(id, _)| id.clone())
            .collect();
        for (room_id, state) in &room_batch {
            let Some(on) = state.switch else { continue };
            let Some(room) = self.rooms.get(room_id) else { continue };
            for member in &room.devices {
                if explicit.contains(member) || !self.devices.contains(member) {
                    continue;
                }
                trace!(room = %room_id, device = %member, on, "propagating room switch");
                device_batch
                    .entry(member.clone())
                    .or_default()
                    .merge(&DeviceState::switched(on));
            }
        }

        for (id, state) in device_batch {
            if !self.devices.apply(&id, &state) {
                debug!(device = %id, "update for unknown device, dropped");
                continue;
            }
            let store = Arc::clone(&self.devices);
            self.device_updates
                .push(&id, state, move |id, merged| store.trigger_listeners(&id, merged));
        }

        for (id, state) in room_batch {
            if !self.rooms.apply(&id, &state) {
                debug!(room = %id, "update for unknown room, dropped");
                continue;
            }
            let store = Arc::clone(&self.rooms);
            self.room_updates
                .push(&id, state, move |id, merged| store.trigger_listeners(&id, merged));
        }
    }

    /// Explicit id, or the unique device matching `(name, type)`.
    fn resolve_device_id(&self, entry: &Value) -> Option<String> {
        if let Some(id) = entry.get("id").and_then(convert::parse_id) {
            return Some(id);
        }

        let name = entry.get("name").and_then(Value::as_str);
        let device_type = convert::device_type(entry);
        let (Some(name), Some(device_type)) = (name, device_type) else {
            warn!(%entry, "device update without id or name/type, dropped");
            return None;
        };

        match self
            .devices
            .find_unique(|d| d.name == name && d.device_type == device_type)
        {
            Ok(device) => Some(device.id.clone()),
            Err(matches) => {
                warn!(name, device_type, matches, "ambiguous device update, dropped");
                None
            }
        }
    }
}

fn error_message(payload: &Value) -> String {
    ["message", "error", "text"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_str))
        .map_or_else(|| payload.to_string(), str::to_owned)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bridgelink_api::{ConnectionConfig, SessionKeys, SocketHandle};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct Fixture {
        handler: MessageHandler,
        conn: Arc<ConnectionManager>,
        devices: Arc<DeviceStore>,
        rooms: Arc<RoomStore>,
        events: broadcast::Receiver<BridgeEvent>,
        sent: mpsc::UnboundedReceiver<String>,
    }

    fn fixture() -> Fixture {
        let conn = Arc::new(ConnectionManager::new(ConnectionConfig::default()));
        let (tx, sent) = mpsc::unbounded_channel();
        conn.attach(SocketHandle::new(tx, CancellationToken::new()));
        conn.install_keys(SessionKeys::generate());
        let devices = Arc::new(DeviceStore::new());
        let rooms = Arc::new(RoomStore::new());
        let (event_tx, events) = broadcast::channel(16);
        let handler = MessageHandler::new(
            Arc::clone(&conn),
            Arc::clone(&devices),
            Arc::clone(&rooms),
            Duration::from_millis(150),
            event_tx,
        );
        Fixture {
            handler,
            conn,
            devices,
            rooms,
            events,
            sent,
        }
    }

    fn discovery() -> ParsedMessage {
        ParsedMessage::Discovery {
            payload: json!({
                "devices": [
                    {"id": 12, "name": "Ceiling", "type": 2, "switch": 0, "dimmvalue": 10},
                    {"id": 13, "name": "Lamp", "type": 1, "switch": 0},
                    {"id": 14, "name": "Lamp", "type": 1},
                    {"id": 15, "name": "Blind", "type": 4}
                ],
                "rooms": [{"id": 3, "name": "Living", "devices": [12, 13]}],
                "last_item": true
            }),
        }
    }

    fn collect_updates(
        store: &DeviceStore,
        id: &str,
    ) -> mpsc::UnboundedReceiver<DeviceState> {
        let (tx, rx) = mpsc::unbounded_channel();
        store.add_listener(id, move |update: &DeviceState| {
            let _ = tx.send(update.clone());
        });
        rx
    }

    #[tokio::test]
    async fn discovery_fills_stores_and_signals_ready_once() {
        let mut f = fixture();
        let ready = f.handler.devices_ready();

        f.handler.handle(discovery());
        f.handler.handle(discovery());

        assert!(*ready.borrow());
        assert_eq!(f.devices.len(), 4);
        assert_eq!(f.rooms.len(), 1);
        assert_eq!(
            f.events.try_recv().unwrap(),
            BridgeEvent::DevicesLoaded {
                devices: 4,
                rooms: 1
            }
        );
        assert!(f.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn discovery_dispatches_live_fields_after_registration() {
        let f = fixture();
        let mut updates = collect_updates(&f.devices, "12");
        let devices = Arc::clone(&f.devices);
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        f.devices.add_listener("12", move |_: &DeviceState| {
            let _ = seen_tx.send(devices.contains("12"));
        });

        f.handler.handle(discovery());

        let update = updates.recv().await.unwrap();
        assert_eq!(update.switch, Some(false));
        assert_eq!(update.dim_level, Some(10));
        assert_eq!(seen_rx.recv().await, Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn bursty_updates_reach_listeners_once() {
        let f = fixture();
        f.handler.handle(discovery());
        let mut updates = collect_updates(&f.devices, "13");

        for payload in [
            json!({"devices": [{"id": 13, "switch": 1}]}),
            json!({"devices": [{"id": 13, "power": 40}]}),
            json!({"devices": [{"id": "13", "info": [{"key": "rssi", "value": -50}]}]}),
        ] {
            f.handler.handle(ParsedMessage::StateUpdate { payload });
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        let merged = updates.recv().await.unwrap();
        assert_eq!(merged.switch, Some(true));
        assert_eq!(merged.power, Some(40.0));
        assert_eq!(merged.info["rssi"], json!(-50));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(updates.try_recv().is_err());

        // The store reflects the merged state right away.
        let stored = f.devices.get("13").unwrap();
        assert_eq!(stored.state.switch, Some(true));
        assert_eq!(stored.state.power, Some(40.0));
    }

    #[tokio::test(start_paused = true)]
    async fn curstate_falls_back_for_switch() {
        let f = fixture();
        f.handler.handle(discovery());
        f.handler.handle(ParsedMessage::StateUpdate {
            payload: json!({"devices": [{"id": 15, "curstate": 1}]}),
        });
        assert_eq!(f.devices.get("15").unwrap().state.switch, Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn room_switch_propagates_to_silent_members() {
        let f = fixture();
        f.handler.handle(discovery());
        f.handler.handle(ParsedMessage::StateUpdate {
            payload: json!({
                "devices": [{"id": 12, "switch": 0}],
                "rooms": [{"id": 3, "switch": 1}]
            }),
        });

        // 12 had its own echo and keeps it; 13 follows the room.
        assert_eq!(f.devices.get("12").unwrap().state.switch, Some(false));
        assert_eq!(f.devices.get("13").unwrap().state.switch, Some(true));
        assert_eq!(f.devices.get("14").unwrap().state.switch, None);
        assert_eq!(f.rooms.get("3").unwrap().state.switch, Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn updates_without_id_use_unique_name_and_type() {
        let f = fixture();
        f.handler.handle(discovery());

        f.handler.handle(ParsedMessage::StateUpdate {
            payload: json!({"devices": [{"name": "Blind", "type": 4, "shading": {"position": 70}}]}),
        });
        assert_eq!(
            f.devices.get("15").unwrap().state.shading_position,
            Some(70.0)
        );

        // Two devices are called "Lamp" with type 1: ambiguous, dropped.
        f.handler.handle(ParsedMessage::StateUpdate {
            payload: json!({"devices": [{"name": "Lamp", "type": 1, "switch": 1}]}),
        });
        assert_eq!(f.devices.get("13").unwrap().state.switch, Some(false));
        assert_eq!(f.devices.get("14").unwrap().state.switch, None);
    }

    #[tokio::test]
    async fn acks_resolve_pending_and_heartbeats_are_answered() {
        let mut f = fixture();
        assert!(!f.conn.handle_ack(5));
        f.handler.handle(ParsedMessage::Ack { counter: 5 });

        f.handler.handle(ParsedMessage::Heartbeat { counter: Some(77) });
        let frame = f.sent.recv().await.unwrap();
        let ack = f.conn.decode_frame(&frame).unwrap();
        assert_eq!(ack.type_int, 1);
        assert_eq!(ack.reference, Some(77));
    }

    #[tokio::test]
    async fn bridge_errors_and_status_become_events() {
        let mut f = fixture();
        f.handler.handle(ParsedMessage::ErrorInfo {
            payload: json!({"message": "device offline"}),
        });
        f.handler.handle(ParsedMessage::BridgeState {
            payload: json!({"online": true}),
        });

        assert_eq!(
            f.events.try_recv().unwrap(),
            BridgeEvent::Error {
                message: "device offline".into()
            }
        );
        assert_eq!(
            f.events.try_recv().unwrap(),
            BridgeEvent::BridgeStatus(json!({"online": true}))
        );
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let f = fixture();
        let ready = f.handler.devices_ready();
        f.handler.handle(discovery());
        f.handler.reset();
        assert!(f.devices.is_empty());
        assert!(f.rooms.is_empty());
        assert!(!*ready.borrow());
    }
}
