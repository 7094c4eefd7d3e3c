//! Shared configuration for bridgelink consumers.
//!
//! TOML profiles, auth-key resolution (env + plaintext), and translation
//! to `bridgelink_core::BridgeConfig`. The CLI layers its flag overrides
//! on top.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use bridgelink_core::BridgeConfig;

/// Environment variable consulted for the auth key when a profile does not
/// name its own.
pub const AUTH_KEY_ENV: &str = "BRIDGELINK_AUTH_KEY";

const ENV_PREFIX: &str = "BRIDGELINK_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no auth key configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("profile '{profile}' not found")]
    UnknownProfile { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named bridge profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Profile to use: the explicit name, else `default_profile`, else
    /// `"default"`.
    pub fn active_profile_name(&self, explicit: Option<&str>) -> String {
        explicit
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into())
    }

    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProfile {
                profile: name.into(),
            })
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// Connect timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            timeout: default_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    30
}

/// A named bridge profile.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Bridge address (e.g., "192.168.1.20" or "ws://bridge.local:8080").
    pub host: String,

    /// Auth key (plaintext; prefer an env var).
    pub auth_key: Option<String>,

    /// Environment variable name containing the auth key.
    pub auth_key_env: Option<String>,

    /// Stable client identity; generated per run when absent.
    pub client_device_id: Option<String>,

    /// Override connect timeout (seconds).
    pub timeout: Option<u64>,

    /// Heartbeat period in seconds.
    pub heartbeat_interval: Option<u64>,

    /// Login salt length.
    pub salt_length: Option<usize>,

    /// ACK wait per command attempt, in milliseconds.
    pub ack_timeout_ms: Option<u64>,

    /// Retries after the first command attempt.
    pub max_retries: Option<u32>,

    /// Base reconnect delay after an orderly close, in seconds.
    pub reconnect_delay: Option<u64>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "bridgelink", "bridgelink").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("bridgelink");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from a specific file: defaults, then the TOML file (if present),
/// then `BRIDGELINK_*` variables (`__` separates nested keys).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if loading fails.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the auth key: the profile's `auth_key_env`, then
/// [`AUTH_KEY_ENV`], then plaintext. The key is trimmed and must not be
/// empty.
pub fn resolve_auth_key(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    let from_named_env = profile
        .auth_key_env
        .as_deref()
        .and_then(|name| std::env::var(name).ok());

    let raw = from_named_env
        .or_else(|| std::env::var(AUTH_KEY_ENV).ok())
        .or_else(|| profile.auth_key.clone())
        .ok_or_else(|| ConfigError::NoCredentials {
            profile: profile_name.into(),
        })?;

    validate_auth_key(&raw)
}

/// Trim and check an auth key from any source.
pub fn validate_auth_key(raw: &str) -> Result<SecretString, ConfigError> {
    let key = raw.trim();
    if key.is_empty() {
        return Err(ConfigError::Validation {
            field: "auth_key".into(),
            reason: "must not be empty".into(),
        });
    }
    Ok(SecretString::from(key.to_owned()))
}

/// Build a `BridgeConfig` from a profile alone, without CLI flag overrides.
pub fn profile_to_bridge_config(
    profile: &Profile,
    profile_name: &str,
) -> Result<BridgeConfig, ConfigError> {
    let auth_key = resolve_auth_key(profile, profile_name)?;
    build_bridge_config(profile, &profile.host, &auth_key)
}

/// Apply a profile's overrides to a fresh `BridgeConfig` for `host`.
pub fn build_bridge_config(
    profile: &Profile,
    host: &str,
    auth_key: &SecretString,
) -> Result<BridgeConfig, ConfigError> {
    if host.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: "host".into(),
            reason: "bridge host is required".into(),
        });
    }

    let mut config = BridgeConfig::new(host, auth_key.expose_secret());
    if let Some(ref id) = profile.client_device_id {
        config = config.with_client_device_id(id.clone());
    }
    if let Some(secs) = profile.timeout {
        config.connect_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = profile.heartbeat_interval {
        if secs == 0 {
            return Err(ConfigError::Validation {
                field: "heartbeat_interval".into(),
                reason: "must be at least 1 second".into(),
            });
        }
        config.connection.heartbeat_interval = Duration::from_secs(secs);
    }
    if let Some(length) = profile.salt_length {
        config.connection.salt_length = length;
    }
    if let Some(ms) = profile.ack_timeout_ms {
        config.connection.ack_timeout = Duration::from_millis(ms);
    }
    if let Some(retries) = profile.max_retries {
        config.connection.max_retries = retries;
    }
    if let Some(secs) = profile.reconnect_delay {
        config.reconnect.delay = Duration::from_secs(secs);
    }

    // Reject an unparseable address now rather than at connect time.
    config.url().map_err(|e| ConfigError::Validation {
        field: "host".into(),
        reason: e.to_string(),
    })?;
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use figment::Jail;
    use pretty_assertions::assert_eq;

    fn profile(host: &str) -> Profile {
        Profile {
            host: host.into(),
            ..Profile::default()
        }
    }

    #[test]
    fn loads_profiles_from_toml() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                default_profile = "home"

                [defaults]
                output = "json"

                [profiles.home]
                host = "192.168.1.20"
                auth_key_env = "HOME_BRIDGE_KEY"
                heartbeat_interval = 20
                salt_length = 12
                "#,
            )?;

            let config = load_config_from(Path::new("config.toml")).unwrap();
            assert_eq!(config.active_profile_name(None), "home");
            assert_eq!(config.active_profile_name(Some("office")), "office");
            assert_eq!(config.defaults.output, "json");
            assert_eq!(config.defaults.timeout, 30);

            let home = config.profile("home").unwrap();
            assert_eq!(home.host, "192.168.1.20");
            assert_eq!(home.heartbeat_interval, Some(20));
            assert!(matches!(
                config.profile("office"),
                Err(ConfigError::UnknownProfile { .. })
            ));
            Ok(())
        });
    }

    #[test]
    fn env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                [profiles.home]
                host = "192.168.1.20"
                "#,
            )?;
            jail.set_env("BRIDGELINK_DEFAULT_PROFILE", "home");
            jail.set_env("BRIDGELINK_PROFILES__HOME__HOST", "10.0.0.9");

            let config = load_config_from(Path::new("config.toml")).unwrap();
            assert_eq!(config.active_profile_name(None), "home");
            assert_eq!(config.profile("home").unwrap().host, "10.0.0.9");
            Ok(())
        });
    }

    #[test]
    fn missing_file_yields_defaults() {
        Jail::expect_with(|_| {
            let config = load_config_from(Path::new("nope.toml")).unwrap();
            assert_eq!(config.default_profile.as_deref(), Some("default"));
            assert!(config.profiles.is_empty());
            Ok(())
        });
    }

    #[test]
    fn auth_key_resolution_order() {
        Jail::expect_with(|jail| {
            let mut p = profile("bridge");
            p.auth_key = Some(" plain-key ".into());
            assert_eq!(
                resolve_auth_key(&p, "home").unwrap().expose_secret(),
                "plain-key"
            );

            jail.set_env(AUTH_KEY_ENV, "global-key");
            assert_eq!(
                resolve_auth_key(&p, "home").unwrap().expose_secret(),
                "global-key"
            );

            p.auth_key_env = Some("HOME_BRIDGE_KEY".into());
            jail.set_env("HOME_BRIDGE_KEY", "named-key\n");
            assert_eq!(
                resolve_auth_key(&p, "home").unwrap().expose_secret(),
                "named-key"
            );
            Ok(())
        });
    }

    #[test]
    fn empty_or_missing_key_is_rejected() {
        Jail::expect_with(|_| {
            let mut p = profile("bridge");
            assert!(matches!(
                resolve_auth_key(&p, "home"),
                Err(ConfigError::NoCredentials { .. })
            ));
            p.auth_key = Some("   ".into());
            assert!(matches!(
                resolve_auth_key(&p, "home"),
                Err(ConfigError::Validation { .. })
            ));
            Ok(())
        });
    }

    #[test]
    fn profile_overrides_reach_bridge_config() {
        let p = Profile {
            host: "192.168.1.20".into(),
            client_device_id: Some("client-1".into()),
            timeout: Some(10),
            heartbeat_interval: Some(20),
            salt_length: Some(12),
            max_retries: Some(5),
            ..Profile::default()
        };
        let key = SecretString::from("key".to_owned());
        let config = build_bridge_config(&p, &p.host, &key).unwrap();

        assert_eq!(config.client_device_id, "client-1");
        assert_eq!(config.connection.client_id, "client-1");
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.connection.heartbeat_interval, Duration::from_secs(20));
        assert_eq!(config.connection.salt_length, 12);
        assert_eq!(config.connection.max_retries, 5);

        assert!(matches!(
            build_bridge_config(&profile(""), "", &key),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn save_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.profiles.insert("home".into(), profile("192.168.1.20"));
        save_config_to(&config, &path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("[profiles.home]"));
        assert!(written.contains("host = \"192.168.1.20\""));
    }
}
