//! Handshake, secure-channel setup and login.
//!
//! [`Authenticator`] is a linear state machine driven by the inbound reader:
//!
//! ```text
//! Idle -> AwaitingPublicKey -> AwaitingSecretAck -> AwaitingLoginResponse
//!      -> AwaitingTokenApply -> AwaitingTokenRenew -> Authenticated
//! ```
//!
//! Each step consumes one validated inbound message and answers with exactly
//! one outbound message. The token is applied twice (apply, renew, apply)
//! before the bridge accepts commands.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::connection::ConnectionManager;
use crate::crypto::{self, SessionKeys};
use crate::error::Error;
use crate::protocol::{MessageType, ParsedMessage, ProtocolMessage};

/// Login user name the bridge expects.
const LOGIN_USERNAME: &str = "default";

/// Logins answered without a token before the attempt is abandoned.
const MAX_TOKENLESS_LOGINS: u32 = 2;

// ── HandshakeState ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    AwaitingPublicKey,
    AwaitingSecretAck,
    AwaitingLoginResponse,
    AwaitingTokenApply,
    AwaitingTokenRenew,
    Authenticated,
}

/// Outcome of feeding one message to the [`Authenticator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthProgress {
    /// The message advanced (or repeated) a handshake step.
    Pending,
    /// This message completed the handshake.
    Authenticated,
    /// Not a handshake message, or not expected in the current state.
    Ignored,
}

// ── Authenticator ───────────────────────────────────────────────────

pub struct Authenticator {
    auth_key: SecretString,
    state: HandshakeState,
    bridge_device_id: Option<String>,
    connection_id: Option<String>,
    sc_id: Option<String>,
    token: Option<String>,
    is_renewing: bool,
    tokenless_logins: u32,
}

impl Authenticator {
    pub fn new(auth_key: SecretString) -> Self {
        Self {
            auth_key,
            state: HandshakeState::Idle,
            bridge_device_id: None,
            connection_id: None,
            sc_id: None,
            token: None,
            is_renewing: false,
            tokenless_logins: 0,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == HandshakeState::Authenticated
    }

    pub fn bridge_device_id(&self) -> Option<&str> {
        self.bridge_device_id.as_deref()
    }

    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    pub fn sc_id(&self) -> Option<&str> {
        self.sc_id.as_deref()
    }

    /// Back to `Idle` for a fresh connection attempt.
    pub fn reset(&mut self) {
        self.state = HandshakeState::Idle;
        self.bridge_device_id = None;
        self.connection_id = None;
        self.sc_id = None;
        self.token = None;
        self.is_renewing = false;
        self.tokenless_logins = 0;
    }

    /// Feed one inbound message through the state machine.
    ///
    /// Returns `Err` only for a permanent authentication failure or when an
    /// answer cannot be sent.
    pub async fn handle(
        &mut self,
        conn: &ConnectionManager,
        message: &ParsedMessage,
    ) -> Result<AuthProgress, Error> {
        use HandshakeState as S;

        match (self.state, message) {
            // 1. Connection start: confirm with our identity.
            (
                S::Idle,
                ParsedMessage::ConnectionStart {
                    device_id,
                    connection_id,
                    ..
                },
            ) => {
                debug!(bridge = %device_id, connection = %connection_id, "connection start");
                self.bridge_device_id = Some(device_id.clone());
                self.connection_id = Some(connection_id.clone());
                conn.send_raw(ProtocolMessage::with_payload(
                    MessageType::ConnectionConfirm,
                    json!({
                        "client_id": conn.config().client_id,
                        "connection_id": connection_id,
                    }),
                ))?;
                self.state = S::AwaitingPublicKey;
                Ok(AuthProgress::Pending)
            }

            // 2. Bridge ready for the secure channel. Repeats are answered again.
            (S::AwaitingPublicKey, ParsedMessage::ScInitResponse) => {
                tokio::time::sleep(conn.config().sc_init_delay).await;
                debug!("requesting secure channel");
                conn.send_raw(ProtocolMessage::new(MessageType::ScInit))?;
                Ok(AuthProgress::Pending)
            }

            // 3. Public key: wrap fresh session keys with it.
            (S::AwaitingPublicKey, ParsedMessage::PublicKey { public_key }) => {
                let keys = SessionKeys::generate();
                let wrapped = match crypto::wrap_session_keys(&keys, public_key) {
                    Ok(wrapped) => wrapped,
                    Err(e) => {
                        warn!(error = %e, "bridge sent an unusable public key");
                        return Ok(AuthProgress::Ignored);
                    }
                };
                conn.install_keys(keys);
                conn.send_raw(ProtocolMessage::with_payload(
                    MessageType::ScClientKey,
                    json!({ "secret": BASE64.encode(wrapped) }),
                ))?;
                debug!("session keys sent");
                self.state = S::AwaitingSecretAck;
                Ok(AuthProgress::Pending)
            }

            // 4. Secure channel up: log in.
            (S::AwaitingSecretAck, ParsedMessage::SecretAck { sc_id }) => {
                debug!(sc_id = ?sc_id, "secure channel established");
                self.sc_id.clone_from(sc_id);
                self.send_login(conn)?;
                self.state = S::AwaitingLoginResponse;
                Ok(AuthProgress::Pending)
            }

            // 5. Login response: apply the token, or retry once without one.
            (S::AwaitingLoginResponse, ParsedMessage::LoginResponse { token }) => match token {
                Some(token) => {
                    debug!("login accepted");
                    self.tokenless_logins = 0;
                    self.token = Some(token.clone());
                    Self::send_token(conn, MessageType::TokenApply, token)?;
                    self.state = S::AwaitingTokenApply;
                    Ok(AuthProgress::Pending)
                }
                None => {
                    self.tokenless_logins += 1;
                    if self.tokenless_logins >= MAX_TOKENLESS_LOGINS {
                        return Err(Error::Authentication {
                            message: format!(
                                "login answered without a token {} times in a row",
                                self.tokenless_logins
                            ),
                        });
                    }
                    warn!(
                        attempt = self.tokenless_logins,
                        "login response carried no token, retrying"
                    );
                    self.send_login(conn)?;
                    Ok(AuthProgress::Pending)
                }
            },

            // 6. First apply acknowledged: renew.
            (S::AwaitingTokenApply, ParsedMessage::TokenApplyAck) if !self.is_renewing => {
                let Some(token) = self.token.clone() else {
                    return Ok(AuthProgress::Ignored);
                };
                Self::send_token(conn, MessageType::TokenRenew, &token)?;
                self.is_renewing = true;
                self.state = S::AwaitingTokenRenew;
                Ok(AuthProgress::Pending)
            }

            // 7. Renewed token: apply it again.
            (S::AwaitingTokenRenew, ParsedMessage::TokenRenewResponse { token }) => {
                self.token = Some(token.clone());
                Self::send_token(conn, MessageType::TokenApply, token)?;
                Ok(AuthProgress::Pending)
            }

            // 8. Second apply acknowledged: done.
            (S::AwaitingTokenRenew, ParsedMessage::TokenApplyAck) if self.is_renewing => {
                self.is_renewing = false;
                self.state = S::Authenticated;
                info!("authenticated with bridge");
                Ok(AuthProgress::Authenticated)
            }

            (state, message) => {
                if is_handshake_message(message) {
                    debug!(?state, ?message, "handshake message out of sequence, ignored");
                }
                Ok(AuthProgress::Ignored)
            }
        }
    }

    fn send_login(&self, conn: &ConnectionManager) -> Result<(), Error> {
        let bridge_id = self.bridge_device_id.as_deref().unwrap_or_default();
        let salt = crypto::random_salt(conn.config().salt_length);
        let password = crypto::auth_hash(bridge_id, self.auth_key.expose_secret(), &salt);
        conn.send_encrypted(ProtocolMessage::with_payload(
            MessageType::Login,
            json!({
                "username": LOGIN_USERNAME,
                "password": password,
                "salt": salt,
            }),
        ))?;
        debug!("login sent");
        Ok(())
    }

    fn send_token(conn: &ConnectionManager, kind: MessageType, token: &str) -> Result<(), Error> {
        conn.send_encrypted(ProtocolMessage::with_payload(kind, json!({ "token": token })))?;
        debug!(%kind, "token sent");
        Ok(())
    }
}

fn is_handshake_message(message: &ParsedMessage) -> bool {
    matches!(
        message,
        ParsedMessage::ConnectionStart { .. }
            | ParsedMessage::ScInitResponse
            | ParsedMessage::PublicKey { .. }
            | ParsedMessage::SecretAck { .. }
            | ParsedMessage::LoginResponse { .. }
            | ParsedMessage::TokenApplyAck
            | ParsedMessage::TokenRenewResponse { .. }
    )
}

// ── Tests ───────────────────────────────────────────────────────────
