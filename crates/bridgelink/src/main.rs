mod cli;
mod commands;
mod error;
mod output;

use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use bridgelink_config::{self as config, Profile};
use bridgelink_core::{Bridge, BridgeConfig};

use crate::cli::{Cli, Command, GlobalOpts};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        // Config commands don't need a bridge connection
        Command::Config(args) => commands::config_cmd::handle(args, &cli.global),

        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "bridgelink", &mut std::io::stdout());
            Ok(())
        }

        // Everything else talks to the bridge
        cmd => {
            let bridge_config = build_bridge_config(&cli.global)?;
            let bridge = Bridge::new(bridge_config);

            if let Err(err) = bridge.connect().await {
                bridge.disconnect().await;
                return Err(err.into());
            }

            tracing::debug!(command = ?cmd, "dispatching command");
            let result = commands::dispatch(cmd, &bridge, &cli.global).await;
            bridge.disconnect().await;
            result
        }
    }
}

/// Build a `BridgeConfig` from the config file, profile, and CLI overrides.
fn build_bridge_config(global: &GlobalOpts) -> Result<BridgeConfig, CliError> {
    let cfg = config::load_config_or_default();
    let profile_name = cfg.active_profile_name(global.profile.as_deref());

    let adhoc = Profile::default();
    let profile = match cfg.profiles.get(&profile_name) {
        Some(profile) => profile,
        // Flags alone are enough when no profile is configured
        None if global.host.is_some() && global.profile.is_none() => &adhoc,
        None if global.profile.is_some() => {
            let mut names: Vec<_> = cfg.profiles.keys().cloned().collect();
            names.sort();
            return Err(CliError::ProfileNotFound {
                name: profile_name,
                available: if names.is_empty() {
                    "(none)".into()
                } else {
                    names.join(", ")
                },
            });
        }
        None => {
            return Err(CliError::NoConfig {
                path: config::config_path().display().to_string(),
            });
        }
    };

    // Host: flag > env > profile
    let host = global.host.as_deref().unwrap_or(&profile.host);

    // Auth key: flag/env > profile chain
    let auth_key = match global.auth_key.as_deref() {
        Some(key) => config::validate_auth_key(key)?,
        None => config::resolve_auth_key(profile, &profile_name)?,
    };

    let mut bridge_config = config::build_bridge_config(profile, host, &auth_key)?;

    // Timeout: flag > profile > [defaults]
    let timeout = global
        .timeout
        .or(profile.timeout)
        .unwrap_or(cfg.defaults.timeout);
    bridge_config.connect_timeout = Duration::from_secs(timeout);

    Ok(bridge_config)
}
