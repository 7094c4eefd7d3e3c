//! Room command handlers.

use std::sync::Arc;

use tabled::Tabled;

use bridgelink_core::{Bridge, Room};

use crate::cli::{GlobalOpts, RoomsArgs, RoomsCommand};
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct RoomRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Devices")]
    devices: usize,
    #[tabled(rename = "Switch")]
    switch: String,
    #[tabled(rename = "Dim")]
    dim: String,
    #[tabled(rename = "Presence")]
    presence: String,
}

impl RoomRow {
    fn new(r: &Arc<Room>, color: bool) -> Self {
        Self {
            id: r.id.clone(),
            name: r.name.clone(),
            devices: r.devices.len(),
            switch: output::switch_label(r.state.switch, color),
            dim: output::opt(r.state.dim_level),
            presence: r
                .state
                .presence
                .map_or_else(|| "-".into(), |p| if p { "yes".into() } else { "no".into() }),
        }
    }
}

fn detail(bridge: &Bridge, r: &Arc<Room>, color: bool) -> String {
    let mut lines = vec![
        format!("ID:       {}", r.id),
        format!("Name:     {}", r.name),
        format!("Switch:   {}", output::switch_label(r.state.switch, color)),
        format!("Dim:      {}", output::opt(r.state.dim_level)),
    ];
    if let Some(power) = r.state.power {
        lines.push(format!("Power:    {power:.1} W"));
    }
    if let Some(openings) = r.state.openings {
        lines.push(format!("Openings: {openings}"));
    }
    lines.push("Devices:".into());
    for id in &r.devices {
        let name = bridge
            .device(id)
            .map_or_else(|| "(unknown)".to_owned(), |d| d.name.clone());
        lines.push(format!("  {id:<6} {name}"));
    }
    lines.join("\n")
}

pub fn handle(bridge: &Bridge, args: RoomsArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let color = output::should_color(global.color);

    match args.command.unwrap_or(RoomsCommand::List) {
        RoomsCommand::List => {
            let rooms = bridge.rooms();
            let out = output::render_list(
                global.output,
                &rooms,
                |r| RoomRow::new(r, color),
                |r| r.id.clone(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        RoomsCommand::Get { id } => {
            let room = bridge.room(&id).ok_or_else(|| CliError::NotFound {
                resource_type: "room".into(),
                identifier: id.clone(),
                list_command: "rooms list".into(),
            })?;
            let out = output::render_single(
                global.output,
                &room,
                |r| detail(bridge, r, color),
                |r| r.id.clone(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}
