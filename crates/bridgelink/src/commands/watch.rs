//! `watch`: stream lifecycle events and entity updates until Ctrl-C.

use owo_colors::OwoColorize;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use bridgelink_core::{Bridge, BridgeEvent, DeviceState, ListenerId, RoomState};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

/// One coalesced state change, tagged with the entity it belongs to.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Update {
    Device {
        id: String,
        name: String,
        state: DeviceState,
    },
    Room {
        id: String,
        name: String,
        state: RoomState,
    },
}

#[derive(Serialize)]
struct Line<'a, T: Serialize> {
    ts: String,
    #[serde(flatten)]
    item: &'a T,
}

struct Registrations {
    devices: Vec<(String, ListenerId)>,
    rooms: Vec<(String, ListenerId)>,
}

impl Registrations {
    fn remove(self, bridge: &Bridge) {
        for (id, listener) in self.devices {
            bridge.remove_device_listener(&id, listener);
        }
        for (id, listener) in self.rooms {
            bridge.remove_room_listener(&id, listener);
        }
    }
}

fn register(bridge: &Bridge, args: &WatchArgs, tx: &mpsc::UnboundedSender<Update>) -> Registrations {
    let mut registrations = Registrations {
        devices: Vec::new(),
        rooms: Vec::new(),
    };
    if args.events_only {
        return registrations;
    }

    for device in bridge.devices() {
        if !args.devices.is_empty() && !args.devices.contains(&device.id) {
            continue;
        }
        let (id, name, tx) = (device.id.clone(), device.name.clone(), tx.clone());
        let listener = bridge.add_device_listener(&device.id, move |state: &DeviceState| {
            let _ = tx.send(Update::Device {
                id: id.clone(),
                name: name.clone(),
                state: state.clone(),
            });
        });
        registrations.devices.push((device.id.clone(), listener));
    }

    // A device filter excludes rooms.
    if args.devices.is_empty() {
        for room in bridge.rooms() {
            let (id, name, tx) = (room.id.clone(), room.name.clone(), tx.clone());
            let listener = bridge.add_room_listener(&room.id, move |state: &RoomState| {
                let _ = tx.send(Update::Room {
                    id: id.clone(),
                    name: name.clone(),
                    state: state.clone(),
                });
            });
            registrations.rooms.push((room.id.clone(), listener));
        }
    }
    registrations
}

// ── Line rendering ──────────────────────────────────────────────────

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S%.3f").to_string()
}

fn describe_event(event: &BridgeEvent) -> String {
    match event {
        BridgeEvent::Connected => "connected".into(),
        BridgeEvent::Disconnected { code, reason } => format!("disconnected ({code}) {reason}"),
        BridgeEvent::Reconnecting { attempt, delay } => {
            format!("reconnecting: attempt {attempt} in {}ms", delay.as_millis())
        }
        BridgeEvent::Authenticated => "authenticated".into(),
        BridgeEvent::DevicesLoaded { devices, rooms } => {
            format!("devices loaded: {devices} devices, {rooms} rooms")
        }
        BridgeEvent::BridgeStatus(payload) => format!("bridge status {payload}"),
        BridgeEvent::AppInfo(payload) => format!("bridge info {payload}"),
        BridgeEvent::AuthFailed { reason } => format!("authentication failed: {reason}"),
        BridgeEvent::Error { message } => format!("bridge error: {message}"),
    }
}

fn describe_fields(
    switch: Option<bool>,
    dim: Option<u8>,
    power: Option<f64>,
    color: bool,
) -> Vec<String> {
    let mut fields = Vec::new();
    if switch.is_some() {
        fields.push(format!("switch={}", output::switch_label(switch, color)));
    }
    if let Some(level) = dim {
        fields.push(format!("dim={level}"));
    }
    if let Some(watts) = power {
        fields.push(format!("power={watts:.1}W"));
    }
    fields
}

fn describe_update(update: &Update, color: bool) -> String {
    match update {
        Update::Device { id, name, state } => {
            let mut fields = describe_fields(state.switch, state.dim_level, state.power, color);
            if let Some(position) = state.shading_position {
                fields.push(format!("position={position:.0}%"));
            }
            if let Some(temperature) = state.temperature {
                fields.push(format!("temperature={temperature:.1}"));
            }
            if let Some(setpoint) = state.setpoint {
                fields.push(format!("setpoint={setpoint:.1}"));
            }
            format!("device {id} ({name}) {}", fields.join(" "))
        }
        Update::Room { id, name, state } => {
            let mut fields = describe_fields(state.switch, state.dim_level, state.power, color);
            if let Some(presence) = state.presence {
                fields.push(format!("presence={presence}"));
            }
            if let Some(openings) = state.openings {
                fields.push(format!("openings={openings}"));
            }
            format!("room {id} ({name}) {}", fields.join(" "))
        }
    }
}

fn emit<T: Serialize>(
    format: OutputFormat,
    item: &T,
    text: impl FnOnce() -> String,
    color: bool,
) -> Result<(), CliError> {
    let ts = timestamp();
    let line = match format {
        OutputFormat::Json | OutputFormat::JsonCompact => {
            serde_json::to_string(&Line { ts, item })?
        }
        OutputFormat::Table | OutputFormat::Plain if color => {
            format!("{} {}", ts.dimmed(), text())
        }
        OutputFormat::Table | OutputFormat::Plain => format!("{ts} {}", text()),
    };
    output::print_output(&line, false);
    Ok(())
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(bridge: &Bridge, args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let color = output::should_color(global.color);
    let mut events = bridge.events();
    let (tx, mut updates) = mpsc::unbounded_channel();
    let registrations = register(bridge, &args, &tx);
    drop(tx);

    if !global.quiet {
        eprintln!(
            "Watching {} devices and {} rooms. Press Ctrl-C to stop.",
            registrations.devices.len(),
            registrations.rooms.len()
        );
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let result = loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break Ok(()),
            event = events.recv() => match event {
                Ok(event) => {
                    if let Err(e) = emit(global.output, &event, || describe_event(&event), color) {
                        break Err(e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break Ok(()),
            },
            Some(update) = updates.recv() => {
                if let Err(e) = emit(global.output, &update, || describe_update(&update, color), color) {
                    break Err(e);
                }
            }
        }
    };

    registrations.remove(bridge);
    result
}
