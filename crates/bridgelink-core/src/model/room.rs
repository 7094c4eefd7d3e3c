// ── Room domain types ──

use serde::{Deserialize, Serialize};

use super::{Entity, Merge, merge_field};

/// Aggregated room state. Same partial-update semantics as `DeviceState`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub switch: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dim_level: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power: Option<f64>,
    /// Number of open windows/doors reported for the room.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openings: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<bool>,
}

impl Merge for RoomState {
    fn merge(&mut self, other: &Self) {
        merge_field(&mut self.switch, other.switch.as_ref());
        merge_field(&mut self.dim_level, other.dim_level.as_ref());
        merge_field(&mut self.power, other.power.as_ref());
        merge_field(&mut self.openings, other.openings.as_ref());
        merge_field(&mut self.presence, other.presence.as_ref());
    }

    fn is_empty(&self) -> bool {
        self.switch.is_none()
            && self.dim_level.is_none()
            && self.power.is_none()
            && self.openings.is_none()
            && self.presence.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub name: String,
    /// Ids of member devices.
    pub devices: Vec<String>,
    pub state: RoomState,
}

impl Entity for Room {
    type Update = RoomState;

    fn id(&self) -> &str {
        &self.id
    }

    fn apply(&mut self, update: &RoomState) {
        self.state.merge(update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_update_keeps_untouched_fields() {
        let mut room = Room {
            id: "1".into(),
            name: "Kitchen".into(),
            devices: vec!["10".into()],
            state: RoomState {
                switch: Some(false),
                presence: Some(true),
                ..RoomState::default()
            },
        };
        room.apply(&RoomState {
            switch: Some(true),
            ..RoomState::default()
        });
        assert_eq!(room.state.switch, Some(true));
        assert_eq!(room.state.presence, Some(true));
    }
}
