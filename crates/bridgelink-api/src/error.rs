use thiserror::Error;

use crate::protocol::ParseError;

/// Top-level error type for the `bridgelink-api` crate.
///
/// Covers every failure mode of the bridge protocol: cryptography,
/// transport, reliable delivery, handshake and authentication.
/// `bridgelink-core` maps these into user-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Cryptography ────────────────────────────────────────────────
    /// The bridge sent a public key that is not a well-formed PEM document.
    #[error("Invalid bridge public key: {0}")]
    InvalidPublicKey(String),

    /// Encryption or decryption of a frame failed.
    #[error("Crypto error: {0}")]
    Crypto(String),

    // ── Transport ───────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// No socket is open (never connected, or already closed).
    #[error("Not connected to the bridge")]
    NotConnected,

    /// An encrypted send was attempted before the secure channel exists.
    #[error("No encryption context -- secure channel not established")]
    NoEncryptionContext,

    // ── Reliable delivery ───────────────────────────────────────────
    /// No ACK arrived for a command within the timeout.
    #[error("No acknowledgement for message {counter} after {timeout_ms}ms")]
    AckTimeout { counter: u16, timeout_ms: u64 },

    /// The bridge rejected a command.
    #[error("Bridge rejected message {counter}")]
    Nack { counter: u16 },

    /// The socket died while the command was waiting for its ACK.
    #[error("Connection lost while waiting for acknowledgement")]
    ConnectionLost,

    /// Every attempt of a reliable send failed.
    #[error("Command failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<Error> },

    // ── Protocol ────────────────────────────────────────────────────
    /// A message could not be validated into a typed message.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// JSON (de)serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // ── Authentication ──────────────────────────────────────────────
    /// Login failed permanently for this connection attempt.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::WebSocketConnect(_)
                | Self::NotConnected
                | Self::NoEncryptionContext
                | Self::AckTimeout { .. }
                | Self::Nack { .. }
        )
    }

    /// Returns `true` if this error means the bridge refused our credentials.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_the_retryable_ones() {
        assert!(Error::Nack { counter: 4 }.is_transient());
        assert!(
            Error::AckTimeout {
                counter: 4,
                timeout_ms: 5000
            }
            .is_transient()
        );
        assert!(Error::NotConnected.is_transient());

        assert!(!Error::ConnectionLost.is_transient());
        assert!(!Error::Crypto("bad block".into()).is_transient());
        assert!(
            !Error::Authentication {
                message: "no token".into()
            }
            .is_transient()
        );
    }
}
