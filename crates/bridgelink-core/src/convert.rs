// ── Bridge JSON -> domain model conversion ──
//
// The bridge sends loosely typed JSON: ids as numbers or strings, switches
// as 0/1 or booleans, numbers sometimes quoted. Everything is normalized
// here so the rest of the crate only sees `Device` / `Room` values.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::model::{Capabilities, Device, DeviceState, Room, RoomState};

// ── Payload envelopes ────────────────────────────────────────────────

/// `SET_ALL_DATA` / `SET_HOME_DATA` payload.
#[derive(Debug, Default, Deserialize)]
pub struct DiscoveryPayload {
    #[serde(default)]
    pub devices: Vec<Value>,
    #[serde(default)]
    pub rooms: Vec<Value>,
    #[serde(default, alias = "lastItem")]
    last_item: Option<Value>,
}

impl DiscoveryPayload {
    /// Whether this snapshot is the final one of the discovery sequence.
    pub fn is_last(&self) -> bool {
        self.last_item.as_ref().and_then(as_flag).unwrap_or(false)
    }
}

/// `STATE_UPDATE` payload.
#[derive(Debug, Default, Deserialize)]
pub struct StateUpdatePayload {
    #[serde(default)]
    pub devices: Vec<Value>,
    #[serde(default)]
    pub rooms: Vec<Value>,
}

/// Decode a payload, treating `null`/garbage as empty.
pub fn decode_payload<T: DeserializeOwned + Default>(payload: &Value) -> T {
    if payload.is_null() {
        return T::default();
    }
    match T::deserialize(payload) {
        Ok(decoded) => decoded,
        Err(e) => {
            tracing::warn!(error = %e, "unexpected payload shape, ignoring contents");
            T::default()
        }
    }
}

// ── Scalars ──────────────────────────────────────────────────────────

/// Entity id from a JSON number or string.
pub fn parse_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// 0/1, booleans and "0"/"1"/"true"/"false" strings.
fn as_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|v| v.abs() > f64::EPSILON),
        Value::String(s) => match s.trim() {
            "1" | "true" | "on" => Some(true),
            "0" | "false" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[allow(
    clippy::as_conversions,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn as_percent(value: &Value) -> Option<u8> {
    as_number(value).map(|v| v.round().clamp(0.0, 100.0) as u8)
}

#[allow(
    clippy::as_conversions,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn as_count(value: &Value) -> Option<u32> {
    match value {
        Value::Bool(b) => Some(u32::from(*b)),
        other => as_number(other).map(|v| v.max(0.0) as u32),
    }
}

fn field<'a>(entry: &'a Value, key: &str) -> Option<&'a Value> {
    entry.get(key).filter(|v| !v.is_null())
}

// ── Devices ──────────────────────────────────────────────────────────

/// Live-state fields of one device entry.
///
/// An explicit `switch` wins; otherwise a `curstate` of exactly 0 or 1
/// stands in for it.
pub fn device_state(entry: &Value) -> DeviceState {
    let switch = field(entry, "switch").and_then(as_flag).or_else(|| {
        field(entry, "curstate")
            .and_then(as_number)
            .and_then(|v| {
                if v.abs() < f64::EPSILON {
                    Some(false)
                } else if (v - 1.0).abs() < f64::EPSILON {
                    Some(true)
                } else {
                    None
                }
            })
    });

    let shading = field(entry, "shading");
    let heating = field(entry, "heating");

    DeviceState {
        switch,
        dim_level: field(entry, "dimmvalue").and_then(as_percent),
        power: field(entry, "power").and_then(as_number),
        setpoint: heating
            .and_then(|h| field(h, "setpoint"))
            .and_then(as_number),
        temperature: heating
            .and_then(|h| field(h, "temperature"))
            .and_then(as_number),
        shading_position: shading
            .and_then(|s| field(s, "position"))
            .and_then(as_number),
        shading_safety: shading.and_then(|s| field(s, "safety")).and_then(as_flag),
        info: parse_info(field(entry, "info")),
    }
}

/// `info: [{key, value}, …]` -> map. Entries without a key are skipped.
fn parse_info(info: Option<&Value>) -> BTreeMap<String, Value> {
    let Some(Value::Array(items)) = info else {
        return BTreeMap::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let key = item.get("key").and_then(Value::as_str)?;
            Some((key.to_owned(), item.get("value").cloned().unwrap_or(Value::Null)))
        })
        .collect()
}

fn capabilities(entry: &Value, state: &DeviceState) -> Capabilities {
    let flag = |key: &str| field(entry, key).and_then(as_flag);
    Capabilities {
        switchable: flag("switchable").unwrap_or(state.switch.is_some()),
        dimmable: flag("dimmable").unwrap_or(state.dim_level.is_some()),
        shading_runtime: flag("shading_runtime").unwrap_or_else(|| {
            field(entry, "shading")
                .and_then(|s| field(s, "runtime"))
                .and_then(as_number)
                .is_some_and(|runtime| runtime > 0.0)
        }),
        heating: field(entry, "heating").is_some(),
    }
}

/// Device from a discovery entry. `None` when the entry has no id.
pub fn device_from_discovery(entry: &Value) -> Option<Device> {
    let id = field(entry, "id").and_then(parse_id)?;
    let state = device_state(entry);
    Some(Device {
        name: field(entry, "name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        device_type: device_type(entry).unwrap_or_default(),
        capabilities: capabilities(entry, &state),
        state,
        id,
    })
}

#[allow(clippy::as_conversions, clippy::cast_possible_truncation)]
pub fn device_type(entry: &Value) -> Option<i64> {
    field(entry, "type").and_then(as_number).map(|v| v as i64)
}

// ── Rooms ────────────────────────────────────────────────────────────

pub fn room_state(entry: &Value) -> RoomState {
    RoomState {
        switch: field(entry, "switch").and_then(as_flag),
        dim_level: field(entry, "dimmvalue").and_then(as_percent),
        power: field(entry, "power").and_then(as_number),
        openings: field(entry, "openings").and_then(as_count),
        presence: field(entry, "presence").and_then(as_flag),
    }
}

/// Member ids from a room's `devices` array (ids or `{id}` objects).
pub fn room_members(entry: &Value) -> Option<Vec<String>> {
    let Some(Value::Array(items)) = field(entry, "devices") else {
        return None;
    };
    Some(
        items
            .iter()
            .filter_map(|item| parse_id(item).or_else(|| item.get("id").and_then(parse_id)))
            .collect(),
    )
}

pub fn room_from_discovery(entry: &Value) -> Option<Room> {
    let id = field(entry, "id").and_then(parse_id)?;
    Some(Room {
        name: field(entry, "name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        devices: room_members(entry).unwrap_or_default(),
        state: room_state(entry),
        id,
    })
}
