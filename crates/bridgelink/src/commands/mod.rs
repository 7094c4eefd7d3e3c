//! Command dispatch: bridges CLI args -> core operations -> output formatting.

pub mod config_cmd;
pub mod control;
pub mod devices;
pub mod rooms;
pub mod watch;

use bridgelink_core::Bridge;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a bridge-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, bridge: &Bridge, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Devices(args) => devices::handle(bridge, args, global),
        Command::Rooms(args) => rooms::handle(bridge, args, global),
        Command::Switch { id, state } => control::switch(bridge, &id, state, global).await,
        Command::Dim { id, value } => control::dim(bridge, &id, value, global).await,
        Command::Room { id, action } => control::room(bridge, &id, action, global).await,
        Command::Watch(args) => watch::handle(bridge, args, global).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => Ok(()),
    }
}
