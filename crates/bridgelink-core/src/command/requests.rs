// ── Typed payloads for outbound control commands ──

use serde::Serialize;

/// Entity id as the bridge expects it: numeric ids go out as JSON numbers,
/// everything else as strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum WireId {
    Number(u64),
    Text(String),
}

impl From<&str> for WireId {
    fn from(id: &str) -> Self {
        id.parse().map_or_else(|_| Self::Text(id.to_owned()), Self::Number)
    }
}

// ── Devices ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSwitchRequest {
    pub device_id: WireId,
    /// 1 or 0. Never a boolean.
    pub switch: u8,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDimRequest {
    pub device_id: WireId,
    pub dimmvalue: u8,
}

// ── Rooms ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSwitchRequest {
    pub room_id: WireId,
    pub switch: u8,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDimRequest {
    pub room_id: WireId,
    pub dimmvalue: u8,
}
