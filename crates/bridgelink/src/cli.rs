//! Clap derive structures for the `bridgelink` CLI.
//!
//! Defines the command tree, global flags, and shared value types.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// bridgelink -- talk to a home-automation bridge from the command line
#[derive(Debug, Parser)]
#[command(
    name = "bridgelink",
    version,
    about = "Control lights, blinds and rooms behind a home-automation bridge",
    long_about = "Connects to a bridge over its encrypted websocket protocol,\n\
        loads the device and room lists, and sends switch and dim commands.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Bridge profile to use
    #[arg(long, short = 'p', env = "BRIDGELINK_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Bridge address (overrides profile)
    #[arg(long, short = 'H', env = "BRIDGELINK_HOST", global = true)]
    pub host: Option<String>,

    /// Auth key printed on the bridge
    #[arg(long, env = "BRIDGELINK_AUTH_KEY", global = true, hide_env_values = true)]
    pub auth_key: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "BRIDGELINK_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Connect timeout in seconds, including device discovery
    #[arg(long, env = "BRIDGELINK_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

/// Target switch position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Power {
    On,
    Off,
}

impl Power {
    pub fn is_on(self) -> bool {
        self == Self::On
    }
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inspect devices known to the bridge
    #[command(alias = "dev", alias = "d")]
    Devices(DevicesArgs),

    /// Inspect rooms known to the bridge
    #[command(alias = "r")]
    Rooms(RoomsArgs),

    /// Switch a device on or off
    Switch {
        /// Device ID
        id: String,

        /// Target state
        state: Power,
    },

    /// Dim a device
    Dim {
        /// Device ID
        id: String,

        /// Level: a fraction in 0..=1 or a bridge value in 1..=99 (0 switches off)
        value: f64,
    },

    /// Switch or dim every device in a room
    Room {
        /// Room ID
        id: String,

        #[command(subcommand)]
        action: RoomAction,
    },

    /// Stream lifecycle events and state changes until Ctrl-C
    Watch(WatchArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Devices ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DevicesArgs {
    #[command(subcommand)]
    pub command: Option<DevicesCommand>,
}

#[derive(Debug, Subcommand)]
pub enum DevicesCommand {
    /// List all devices
    #[command(alias = "ls")]
    List,

    /// Show one device in detail
    Get {
        /// Device ID
        id: String,
    },
}

// ── Rooms ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct RoomsArgs {
    #[command(subcommand)]
    pub command: Option<RoomsCommand>,
}

#[derive(Debug, Subcommand)]
pub enum RoomsCommand {
    /// List all rooms
    #[command(alias = "ls")]
    List,

    /// Show one room and its members
    Get {
        /// Room ID
        id: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum RoomAction {
    /// Switch every device in the room
    Switch {
        /// Target state
        state: Power,
    },

    /// Dim every dimmable device in the room (0 switches off)
    Dim {
        /// Level: a fraction in 0..=1 or a bridge value in 1..=99
        value: f64,
    },
}

// ── Watch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Only report these device IDs (repeatable)
    #[arg(long = "device", short = 'd')]
    pub devices: Vec<String>,

    /// Report lifecycle events only, no state changes
    #[arg(long)]
    pub events_only: bool,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,

    /// Display current configuration (secrets masked)
    Show,

    /// List configured profiles
    Profiles,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
