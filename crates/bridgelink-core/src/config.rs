// ── Runtime connection configuration ──
//
// Describes *how* to reach and drive one bridge. Carries the auth key and
// connection tuning, but never touches disk: the CLI (or any embedding
// application) builds a `BridgeConfig` and hands it in.

use std::time::Duration;

use bridgelink_api::{ConnectionConfig, ReconnectConfig};
use secrecy::SecretString;
use url::Url;

use crate::error::CoreError;

/// Configuration for one bridge connection.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Bridge address: `192.168.1.20`, `bridge.local:8080` or a full `ws://` URL.
    pub host: String,
    /// Auth key printed on the bridge. Already trimmed.
    pub auth_key: SecretString,
    /// Identity announced in the connection confirm. Stable for the
    /// lifetime of the config, so reconnects present the same client.
    pub client_device_id: String,
    /// Protocol timing (ACK timeout, retries, heartbeat, salt length).
    pub connection: ConnectionConfig,
    /// Reconnect backoff.
    pub reconnect: ReconnectConfig,
    /// Overall deadline for `connect()` including discovery. Default: 30s.
    pub connect_timeout: Duration,
    /// How often `connect()` checks for the device list. Default: 1s.
    pub discovery_poll_interval: Duration,
    /// Window in which updates for one entity are merged. Default: 150ms.
    pub coalesce_window: Duration,
    /// Quiet period before a dim command is sent. Default: 150ms.
    pub debounce_delay: Duration,
}

impl BridgeConfig {
    /// Config with default timing and a freshly generated client id.
    pub fn new(host: impl Into<String>, auth_key: &str) -> Self {
        let client_device_id = uuid::Uuid::new_v4().to_string();
        Self {
            host: host.into().trim().to_owned(),
            auth_key: SecretString::from(auth_key.trim().to_owned()),
            connection: ConnectionConfig {
                client_id: client_device_id.clone(),
                ..ConnectionConfig::default()
            },
            client_device_id,
            reconnect: ReconnectConfig::default(),
            connect_timeout: Duration::from_secs(30),
            discovery_poll_interval: Duration::from_secs(1),
            coalesce_window: Duration::from_millis(150),
            debounce_delay: Duration::from_millis(150),
        }
    }

    /// Replace the client id (keeps the confirm payload in sync).
    pub fn with_client_device_id(mut self, id: impl Into<String>) -> Self {
        self.client_device_id = id.into();
        self.connection.client_id.clone_from(&self.client_device_id);
        self
    }

    /// Websocket URL of the bridge.
    pub fn url(&self) -> Result<Url, CoreError> {
        let host = self.host.as_str();
        if host.is_empty() {
            return Err(CoreError::Config {
                message: "bridge host is empty".into(),
            });
        }
        let raw = if host.starts_with("ws://") || host.starts_with("wss://") {
            host.to_owned()
        } else {
            format!("ws://{host}")
        };
        Url::parse(&raw).map_err(|e| CoreError::Config {
            message: format!("invalid bridge address '{host}': {e}"),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn new_trims_key_and_generates_client_id() {
        let config = BridgeConfig::new(" 10.0.0.5 ", "  abc123\n");
        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.auth_key.expose_secret(), "abc123");
        assert_eq!(config.client_device_id.len(), 36);
        assert_eq!(config.connection.client_id, config.client_device_id);
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.coalesce_window, Duration::from_millis(150));
    }

    #[test]
    fn explicit_client_id_reaches_connection_config() {
        let config = BridgeConfig::new("h", "k").with_client_device_id("hub-1");
        assert_eq!(config.client_device_id, "hub-1");
        assert_eq!(config.connection.client_id, "hub-1");
    }

    #[test]
    fn url_defaults_to_ws_scheme() {
        let config = BridgeConfig::new("192.168.1.20", "k");
        assert_eq!(config.url().unwrap().as_str(), "ws://192.168.1.20/");

        let config = BridgeConfig::new("ws://127.0.0.1:9001", "k");
        assert_eq!(config.url().unwrap().as_str(), "ws://127.0.0.1:9001/");
    }

    #[test]
    fn empty_host_is_rejected() {
        assert!(matches!(
            BridgeConfig::new("", "k").url(),
            Err(CoreError::Config { .. })
        ));
    }
}
