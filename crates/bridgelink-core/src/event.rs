// ── Lifecycle events ──

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use strum::IntoStaticStr;

/// Lifecycle and bridge-level events, broadcast to every subscriber of
/// [`Bridge::events`](crate::Bridge::events).
#[derive(Debug, Clone, PartialEq, Serialize, IntoStaticStr)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BridgeEvent {
    /// Authenticated and the device list is loaded.
    Connected,
    Disconnected { code: u16, reason: String },
    Reconnecting { attempt: u32, delay: Duration },
    Authenticated,
    DevicesLoaded { devices: usize, rooms: usize },
    /// `SET_BRIDGE_STATE` payload.
    BridgeStatus(Value),
    /// Connection-start payload: bridge id, connection id and metadata.
    AppInfo(Value),
    AuthFailed { reason: String },
    /// Non-fatal error reported by the bridge.
    Error { message: String },
}

impl BridgeEvent {
    /// Stable snake_case name (`devices_loaded`, `auth_failed`, …).
    pub fn name(&self) -> &'static str {
        self.into()
    }
}
