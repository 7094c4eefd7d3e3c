// ── Command API ──
//
// Outbound control operations as a typed enum. The `Bridge` facade
// validates against the stores, then turns each command into a wire
// message and sends it reliably.

pub mod debounce;
pub mod requests;

use bridgelink_api::{MessageType, ProtocolMessage};
use serde::Serialize;
use strum::{Display, EnumString};

use crate::error::CoreError;

pub use debounce::{CommandDebouncer, Debounced};
pub use requests::{
    DeviceDimRequest, DeviceSwitchRequest, RoomDimRequest, RoomSwitchRequest, WireId,
};

/// Operation accepted by [`Bridge::control_room`](crate::Bridge::control_room).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum RoomOperation {
    Switch,
    #[strum(to_string = "dim", serialize = "dimm")]
    Dim,
}

/// All control operations against a bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SwitchDevice { id: String, on: bool },
    DimDevice { id: String, level: u8 },
    SwitchRoom { id: String, on: bool },
    DimRoom { id: String, level: u8 },
    RequestDevices,
    RequestRooms,
}

impl Command {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::SwitchDevice { .. } => MessageType::DeviceSwitch,
            Self::DimDevice { .. } => MessageType::DeviceDim,
            Self::SwitchRoom { .. } => MessageType::RoomSwitch,
            Self::DimRoom { .. } => MessageType::RoomDim,
            Self::RequestDevices => MessageType::RequestDevices,
            Self::RequestRooms => MessageType::RequestRooms,
        }
    }

    /// Wire message without a counter; the connection assigns one on send.
    pub fn to_message(&self) -> Result<ProtocolMessage, CoreError> {
        let kind = self.message_type();
        let message = match self {
            Self::SwitchDevice { id, on } => with_payload(
                kind,
                &DeviceSwitchRequest {
                    device_id: WireId::from(id.as_str()),
                    switch: u8::from(*on),
                },
            )?,
            Self::DimDevice { id, level } => with_payload(
                kind,
                &DeviceDimRequest {
                    device_id: WireId::from(id.as_str()),
                    dimmvalue: *level,
                },
            )?,
            Self::SwitchRoom { id, on } => with_payload(
                kind,
                &RoomSwitchRequest {
                    room_id: WireId::from(id.as_str()),
                    switch: u8::from(*on),
                },
            )?,
            Self::DimRoom { id, level } => with_payload(
                kind,
                &RoomDimRequest {
                    room_id: WireId::from(id.as_str()),
                    dimmvalue: *level,
                },
            )?,
            Self::RequestDevices | Self::RequestRooms => ProtocolMessage::new(kind),
        };
        Ok(message)
    }
}

fn with_payload<T: Serialize>(kind: MessageType, payload: &T) -> Result<ProtocolMessage, CoreError> {
    let payload = serde_json::to_value(payload).map_err(|e| CoreError::Internal(e.to_string()))?;
    Ok(ProtocolMessage::with_payload(kind, payload))
}

/// Map a caller's dim value onto the bridge's 1..=99 scale.
///
/// `None` means "off": values at or below zero (and NaN). Fractions in
/// `(0, 1]` are scaled by 99; larger values are taken as-is.
#[allow(
    clippy::as_conversions,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn scale_dim_value(value: f64) -> Option<u8> {
    if value.is_nan() || value <= 0.0 {
        return None;
    }
    let scaled = if value <= 1.0 { value * 99.0 } else { value };
    Some(scaled.round().clamp(1.0, 99.0) as u8)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn dim_scaling() {
        assert_eq!(scale_dim_value(0.5), Some(50));
        assert_eq!(scale_dim_value(1.0), Some(99));
        assert_eq!(scale_dim_value(0.001), Some(1));
        assert_eq!(scale_dim_value(42.4), Some(42));
        assert_eq!(scale_dim_value(250.0), Some(99));
        assert_eq!(scale_dim_value(0.0), None);
        assert_eq!(scale_dim_value(-3.0), None);
        assert_eq!(scale_dim_value(f64::NAN), None);
    }

    #[test]
    fn switch_payload_uses_integers() {
        let msg = Command::SwitchDevice {
            id: "12".into(),
            on: true,
        }
        .to_message()
        .unwrap();
        assert_eq!(msg.type_int, 281);
        assert_eq!(msg.payload, Some(json!({"deviceId": 12, "switch": 1})));

        let msg = Command::SwitchDevice {
            id: "hue-3".into(),
            on: false,
        }
        .to_message()
        .unwrap();
        assert_eq!(msg.payload, Some(json!({"deviceId": "hue-3", "switch": 0})));
    }

    #[test]
    fn dim_and_room_payloads() {
        let msg = Command::DimDevice {
            id: "12".into(),
            level: 50,
        }
        .to_message()
        .unwrap();
        assert_eq!(msg.type_int, 280);
        assert_eq!(msg.payload, Some(json!({"deviceId": 12, "dimmvalue": 50})));

        let msg = Command::DimRoom {
            id: "3".into(),
            level: 20,
        }
        .to_message()
        .unwrap();
        assert_eq!(msg.type_int, 282);
        assert_eq!(msg.payload, Some(json!({"roomId": 3, "dimmvalue": 20})));

        let msg = Command::RequestRooms.to_message().unwrap();
        assert_eq!(msg.type_int, 242);
        assert_eq!(msg.payload, None);
    }

    #[test]
    fn room_operations_parse() {
        assert_eq!("switch".parse::<RoomOperation>().unwrap(), RoomOperation::Switch);
        assert_eq!("dimm".parse::<RoomOperation>().unwrap(), RoomOperation::Dim);
        assert_eq!("Dim".parse::<RoomOperation>().unwrap(), RoomOperation::Dim);
        assert!("toggle".parse::<RoomOperation>().is_err());
    }
}
