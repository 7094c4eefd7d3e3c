// ── Core error types ──
//
// User-facing errors from bridgelink-core. Consumers never see raw
// protocol failures (ACK counters, cipher errors); the
// `From<bridgelink_api::Error>` impl translates them into
// domain-appropriate variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to bridge at {host}: {reason}")]
    ConnectionFailed { host: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Bridge disconnected")]
    BridgeDisconnected,

    #[error("Bridge connection timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Device not found: {identifier}")]
    DeviceNotFound { identifier: String },

    #[error("Room not found: {identifier}")]
    RoomNotFound { identifier: String },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Operation not supported: {operation} (requires {required})")]
    Unsupported { operation: String, required: String },

    #[error("Command rejected by bridge: {message}")]
    Rejected { message: String },

    #[error("Command failed after {attempts} attempt(s): {message}")]
    CommandFailed { message: String, attempts: u32 },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    // ── Protocol errors (wrapped, not exposed raw) ───────────────────
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::DeviceNotFound { .. } | Self::RoomNotFound { .. })
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<bridgelink_api::Error> for CoreError {
    fn from(err: bridgelink_api::Error) -> Self {
        use bridgelink_api::Error as E;

        match err {
            E::Authentication { message } => CoreError::AuthenticationFailed { message },
            E::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                host: "bridge".into(),
                reason,
            },
            E::NotConnected | E::NoEncryptionContext | E::ConnectionLost => {
                CoreError::BridgeDisconnected
            }
            E::Nack { counter } => CoreError::Rejected {
                message: format!("message {counter} was not acknowledged"),
            },
            E::AckTimeout { .. } => CoreError::CommandFailed {
                message: err.to_string(),
                attempts: 1,
            },
            E::RetriesExhausted { attempts, last } => match *last {
                E::ConnectionLost | E::NotConnected | E::NoEncryptionContext => {
                    CoreError::BridgeDisconnected
                }
                last => CoreError::CommandFailed {
                    message: last.to_string(),
                    attempts,
                },
            },
            E::InvalidPublicKey(_) | E::Crypto(_) | E::Parse(_) | E::Serialization(_) => {
                CoreError::Protocol {
                    message: err.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failure_maps_to_authentication_failed() {
        let err = CoreError::from(bridgelink_api::Error::Authentication {
            message: "no token".into(),
        });
        assert!(matches!(err, CoreError::AuthenticationFailed { message } if message == "no token"));
    }

    #[test]
    fn exhausted_retries_keep_attempt_count() {
        let err = CoreError::from(bridgelink_api::Error::RetriesExhausted {
            attempts: 4,
            last: Box::new(bridgelink_api::Error::AckTimeout {
                counter: 9,
                timeout_ms: 5000,
            }),
        });
        match err {
            CoreError::CommandFailed { attempts, message } => {
                assert_eq!(attempts, 4);
                assert!(message.contains("5000ms"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn connection_loss_is_a_disconnect() {
        assert!(matches!(
            CoreError::from(bridgelink_api::Error::ConnectionLost),
            CoreError::BridgeDisconnected
        ));
    }
}
