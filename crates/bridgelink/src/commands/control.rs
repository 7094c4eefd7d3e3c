//! Switch and dim handlers for devices and rooms.

use bridgelink_core::{Bridge, RoomOperation};

use crate::cli::{GlobalOpts, Power, RoomAction};
use crate::error::CliError;

/// Reject levels the bridge scale can't express.
fn check_level(value: f64) -> Result<f64, CliError> {
    if !value.is_finite() || value < 0.0 || value > 100.0 {
        return Err(CliError::Validation {
            field: "value".into(),
            reason: format!("expected a fraction in 0..=1 or a level up to 100, got {value}"),
        });
    }
    Ok(value)
}

fn not_found(resource_type: &str, id: &str, list_command: &str) -> CliError {
    CliError::NotFound {
        resource_type: resource_type.into(),
        identifier: id.into(),
        list_command: list_command.into(),
    }
}

fn done(global: &GlobalOpts, message: &str) {
    if !global.quiet {
        eprintln!("{message}");
    }
}

pub async fn switch(
    bridge: &Bridge,
    id: &str,
    state: Power,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let device = bridge
        .device(id)
        .ok_or_else(|| not_found("device", id, "devices list"))?;
    bridge.switch_device(id, state.is_on()).await?;
    done(
        global,
        &format!("Switched {} {}", device.name, if state.is_on() { "on" } else { "off" }),
    );
    Ok(())
}

pub async fn dim(bridge: &Bridge, id: &str, value: f64, global: &GlobalOpts) -> Result<(), CliError> {
    let value = check_level(value)?;
    let device = bridge
        .device(id)
        .ok_or_else(|| not_found("device", id, "devices list"))?;
    if !device.capabilities.dimmable {
        return Err(CliError::Unsupported {
            operation: format!("dim {}", device.name),
            required: "a dimmable device".into(),
        });
    }
    bridge.dim_device(id, value).await?;
    done(global, &format!("Dimmed {} to {value}", device.name));
    Ok(())
}

pub async fn room(
    bridge: &Bridge,
    id: &str,
    action: RoomAction,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let room = bridge
        .room(id)
        .ok_or_else(|| not_found("room", id, "rooms list"))?;

    match action {
        RoomAction::Switch { state } => {
            let value = if state.is_on() { 1.0 } else { 0.0 };
            bridge
                .control_room(id, RoomOperation::Switch, value)
                .await?;
            done(
                global,
                &format!("Switched room {} {}", room.name, if state.is_on() { "on" } else { "off" }),
            );
        }
        RoomAction::Dim { value } => {
            let value = check_level(value)?;
            bridge.control_room(id, RoomOperation::Dim, value).await?;
            done(global, &format!("Dimmed room {} to {value}", room.name));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_outside_bridge_scale_are_rejected() {
        assert!(check_level(0.5).is_ok());
        assert!(check_level(0.0).is_ok());
        assert!(check_level(99.0).is_ok());
        assert!(matches!(check_level(-1.0), Err(CliError::Validation { .. })));
        assert!(matches!(check_level(250.0), Err(CliError::Validation { .. })));
        assert!(matches!(check_level(f64::NAN), Err(CliError::Validation { .. })));
    }
}
