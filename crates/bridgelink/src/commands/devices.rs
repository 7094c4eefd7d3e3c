//! Device command handlers.

use std::sync::Arc;

use tabled::Tabled;

use bridgelink_core::{Bridge, Device};

use crate::cli::{DevicesArgs, DevicesCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    dtype: i64,
    #[tabled(rename = "Switch")]
    switch: String,
    #[tabled(rename = "Dim")]
    dim: String,
    #[tabled(rename = "Power")]
    power: String,
}

impl DeviceRow {
    fn new(d: &Arc<Device>, color: bool) -> Self {
        Self {
            id: d.id.clone(),
            name: d.name.clone(),
            dtype: d.device_type,
            switch: output::switch_label(d.state.switch, color),
            dim: if d.capabilities.dimmable {
                output::opt(d.state.dim_level)
            } else {
                "-".into()
            },
            power: d.state.power.map_or_else(|| "-".into(), |w| format!("{w:.1} W")),
        }
    }
}

fn capabilities(d: &Device) -> String {
    let caps = d.capabilities;
    let names: Vec<&str> = [
        (caps.switchable, "switch"),
        (caps.dimmable, "dim"),
        (caps.shading_runtime, "shading"),
        (caps.heating, "heating"),
    ]
    .into_iter()
    .filter_map(|(has, name)| has.then_some(name))
    .collect();
    if names.is_empty() {
        "-".into()
    } else {
        names.join(", ")
    }
}

fn detail(d: &Arc<Device>, color: bool) -> String {
    let s = &d.state;
    let mut lines = vec![
        format!("ID:           {}", d.id),
        format!("Name:         {}", d.name),
        format!("Type:         {}", d.device_type),
        format!("Capabilities: {}", capabilities(d)),
        format!("Switch:       {}", output::switch_label(s.switch, color)),
    ];
    if let Some(level) = s.dim_level {
        lines.push(format!("Dim level:    {level}"));
    }
    if let Some(power) = s.power {
        lines.push(format!("Power:        {power:.1} W"));
    }
    if let Some(position) = s.shading_position {
        lines.push(format!("Position:     {position:.0}%"));
    }
    if let Some(safety) = s.shading_safety {
        lines.push(format!("Safety:       {safety}"));
    }
    if let Some(setpoint) = s.setpoint {
        lines.push(format!("Setpoint:     {setpoint:.1}°C"));
    }
    if let Some(temperature) = s.temperature {
        lines.push(format!("Temperature:  {temperature:.1}°C"));
    }
    for (key, value) in &s.info {
        lines.push(format!("{:<13} {value}", format!("{key}:")));
    }
    lines.join("\n")
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(bridge: &Bridge, args: DevicesArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let color = output::should_color(global.color);

    match args.command.unwrap_or(DevicesCommand::List) {
        DevicesCommand::List => {
            let devices = bridge.devices();
            let out = output::render_list(
                global.output,
                &devices,
                |d| DeviceRow::new(d, color),
                |d| d.id.clone(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        DevicesCommand::Get { id } => {
            let device = bridge.device(&id).ok_or_else(|| CliError::NotFound {
                resource_type: "device".into(),
                identifier: id.clone(),
                list_command: "devices list".into(),
            })?;
            let out = output::render_single(
                global.output,
                &device,
                |d| detail(d, color),
                |d| d.id.clone(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}
