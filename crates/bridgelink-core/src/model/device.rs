// ── Device domain types ──

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Entity, Merge, merge_field};

/// What a device can do, as far as the bridge tells us.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct Capabilities {
    pub switchable: bool,
    pub dimmable: bool,
    /// Shading actuator with a known runtime (position reporting).
    pub shading_runtime: bool,
    pub heating: bool,
}

/// Live device state. Every field is optional: a `DeviceState` is also a
/// partial update where absent fields leave the current value alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub switch: Option<bool>,
    /// Dim level on the bridge's 0..=100 scale.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dim_level: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setpoint: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shading_position: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shading_safety: Option<bool>,
    /// Free-form metadata from the bridge's `info` array.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub info: BTreeMap<String, Value>,
}

impl DeviceState {
    /// Only a switch value (used for room-to-member propagation).
    pub fn switched(on: bool) -> Self {
        Self {
            switch: Some(on),
            ..Self::default()
        }
    }
}

impl Merge for DeviceState {
    fn merge(&mut self, other: &Self) {
        merge_field(&mut self.switch, other.switch.as_ref());
        merge_field(&mut self.dim_level, other.dim_level.as_ref());
        merge_field(&mut self.power, other.power.as_ref());
        merge_field(&mut self.setpoint, other.setpoint.as_ref());
        merge_field(&mut self.temperature, other.temperature.as_ref());
        merge_field(&mut self.shading_position, other.shading_position.as_ref());
        merge_field(&mut self.shading_safety, other.shading_safety.as_ref());
        for (key, value) in &other.info {
            merge_info_value(self.info.entry(key.clone()).or_insert(Value::Null), value);
        }
    }

    fn is_empty(&self) -> bool {
        self.switch.is_none()
            && self.dim_level.is_none()
            && self.power.is_none()
            && self.setpoint.is_none()
            && self.temperature.is_none()
            && self.shading_position.is_none()
            && self.shading_safety.is_none()
            && self.info.is_empty()
    }
}

/// Objects merge key by key; anything else is replaced.
fn merge_info_value(dst: &mut Value, src: &Value) {
    match (dst, src) {
        (Value::Object(dst), Value::Object(src)) => {
            for (key, value) in src {
                merge_info_value(dst.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
        (dst, src) => *dst = src.clone(),
    }
}

/// A device known to the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    /// Bridge type code.
    pub device_type: i64,
    pub capabilities: Capabilities,
    pub state: DeviceState,
}

impl Entity for Device {
    type Update = DeviceState;

    fn id(&self) -> &str {
        &self.id
    }

    fn apply(&mut self, update: &DeviceState) {
        self.state.merge(update);
    }
}
