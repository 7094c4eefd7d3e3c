//! Bridge wire protocol: message type codes, the JSON envelope, the rolling
//! message counter, and validation of raw envelopes into typed messages.
//!
//! Every frame on the wire is a [`ProtocolMessage`] envelope
//! `{type_int, mc?, ref?, payload?}`. Inbound envelopes are validated into a
//! [`ParsedMessage`] before anything acts on them, so the handshake and the
//! state handlers only ever see well-formed data.

use std::fmt;
use std::sync::atomic::{AtomicU16, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::crypto::FRAME_TERMINATOR;

// ── MessageType ─────────────────────────────────────────────────────

/// Protocol type codes (`type_int` on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Ack,
    Heartbeat,
    Nack,
    ConnectionStart,
    ConnectionConfirm,
    /// Sent by the bridge once it is ready for the secure-channel init.
    ScInitResponse,
    ScInit,
    ScPublicKey,
    ScClientKey,
    ScAck,
    Login,
    LoginResponse,
    TokenApply,
    TokenApplyAck,
    TokenRenew,
    TokenRenewResponse,
    RequestDevices,
    RequestRooms,
    DeviceDim,
    DeviceSwitch,
    RoomDim,
    RoomSwitch,
    ErrorInfo,
    SetAllData,
    SetHomeData,
    StateUpdate,
    SetBridgeState,
    Unknown(u16),
}

impl MessageType {
    pub fn from_code(code: u16) -> Self {
        match code {
            1 => Self::Ack,
            2 => Self::Heartbeat,
            3 => Self::Nack,
            10 => Self::ConnectionStart,
            11 => Self::ConnectionConfirm,
            12 => Self::ScInitResponse,
            14 => Self::ScInit,
            15 => Self::ScPublicKey,
            16 => Self::ScClientKey,
            17 => Self::ScAck,
            30 => Self::Login,
            32 => Self::LoginResponse,
            33 => Self::TokenApply,
            34 => Self::TokenApplyAck,
            37 => Self::TokenRenew,
            38 => Self::TokenRenewResponse,
            240 => Self::RequestDevices,
            242 => Self::RequestRooms,
            280 => Self::DeviceDim,
            281 => Self::DeviceSwitch,
            282 => Self::RoomDim,
            283 => Self::RoomSwitch,
            295 => Self::ErrorInfo,
            300 => Self::SetAllData,
            303 => Self::SetHomeData,
            310 => Self::StateUpdate,
            364 => Self::SetBridgeState,
            other => Self::Unknown(other),
        }
    }

    pub fn code(self) -> u16 {
        match self {
            Self::Ack => 1,
            Self::Heartbeat => 2,
            Self::Nack => 3,
            Self::ConnectionStart => 10,
            Self::ConnectionConfirm => 11,
            Self::ScInitResponse => 12,
            Self::ScInit => 14,
            Self::ScPublicKey => 15,
            Self::ScClientKey => 16,
            Self::ScAck => 17,
            Self::Login => 30,
            Self::LoginResponse => 32,
            Self::TokenApply => 33,
            Self::TokenApplyAck => 34,
            Self::TokenRenew => 37,
            Self::TokenRenewResponse => 38,
            Self::RequestDevices => 240,
            Self::RequestRooms => 242,
            Self::DeviceDim => 280,
            Self::DeviceSwitch => 281,
            Self::RoomDim => 282,
            Self::RoomSwitch => 283,
            Self::ErrorInfo => 295,
            Self::SetAllData => 300,
            Self::SetHomeData => 303,
            Self::StateUpdate => 310,
            Self::SetBridgeState => 364,
            Self::Unknown(code) => code,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "unknown({code})"),
            known => write!(f, "{known:?}({})", known.code()),
        }
    }
}

// ── ProtocolMessage ─────────────────────────────────────────────────

/// The JSON envelope of every frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    pub type_int: u16,

    /// Message counter of this message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mc: Option<u16>,

    /// Counter of the message this one refers to (ACK/NACK correlation).
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl ProtocolMessage {
    pub fn new(kind: MessageType) -> Self {
        Self {
            type_int: kind.code(),
            mc: None,
            reference: None,
            payload: None,
        }
    }

    pub fn with_payload(kind: MessageType, payload: Value) -> Self {
        Self {
            payload: Some(payload),
            ..Self::new(kind)
        }
    }

    /// An ACK referring to the given counter.
    pub fn ack(reference: u16) -> Self {
        Self {
            reference: Some(reference),
            ..Self::new(MessageType::Ack)
        }
    }

    pub fn kind(&self) -> MessageType {
        MessageType::from_code(self.type_int)
    }

    /// Counter an ACK/NACK refers to: `ref` when present, otherwise `mc`.
    pub fn correlation(&self) -> Option<u16> {
        self.reference.or(self.mc)
    }

    fn payload_str(&self, field: &'static str) -> Option<&str> {
        self.payload
            .as_ref()
            .and_then(|p| p.get(field))
            .and_then(Value::as_str)
    }

    fn require_str(&self, field: &'static str) -> Result<String, ParseError> {
        match self.payload_str(field) {
            Some(value) if !value.is_empty() => Ok(value.to_owned()),
            _ => Err(ParseError::MissingField {
                kind: self.kind(),
                field,
            }),
        }
    }
}

// ── MessageCounter ──────────────────────────────────────────────────

/// 16-bit rolling message counter: yields 1, 2, …, 65535, 1, …
///
/// Never yields 0, never skips a value.
#[derive(Debug)]
pub struct MessageCounter {
    last: AtomicU16,
}

impl MessageCounter {
    pub fn new() -> Self {
        Self {
            last: AtomicU16::new(0),
        }
    }

    pub fn next(&self) -> u16 {
        let step = |v: u16| if v == u16::MAX { 1 } else { v + 1 };
        match self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| Some(step(v)))
        {
            Ok(previous) | Err(previous) => step(previous),
        }
    }

    /// Start over at 1 (fresh connection).
    pub fn reset(&self) {
        self.last.store(0, Ordering::Release);
    }
}

impl Default for MessageCounter {
    fn default() -> Self {
        Self::new()
    }
}

// ── ParsedMessage ───────────────────────────────────────────────────

/// Validation failure when turning an envelope into a [`ParsedMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("{kind} message is missing required field '{field}'")]
    MissingField {
        kind: MessageType,
        field: &'static str,
    },

    #[error("{kind} message has no counter to correlate")]
    MissingCounter { kind: MessageType },

    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

/// A validated inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedMessage {
    Ack { counter: u16 },
    Nack { counter: u16 },
    Heartbeat { counter: Option<u16> },
    ConnectionStart {
        device_id: String,
        connection_id: String,
        /// The full payload, surfaced to consumers as bridge app info.
        info: Value,
    },
    ScInitResponse,
    PublicKey { public_key: String },
    SecretAck { sc_id: Option<String> },
    LoginResponse { token: Option<String> },
    TokenApplyAck,
    TokenRenewResponse { token: String },
    /// Discovery snapshot (`SET_ALL_DATA` / `SET_HOME_DATA`).
    Discovery { payload: Value },
    StateUpdate { payload: Value },
    ErrorInfo { payload: Value },
    BridgeState { payload: Value },
    Other { kind: MessageType, payload: Option<Value> },
}

impl TryFrom<ProtocolMessage> for ParsedMessage {
    type Error = ParseError;

    fn try_from(msg: ProtocolMessage) -> Result<Self, Self::Error> {
        let kind = msg.kind();
        let parsed = match kind {
            MessageType::Ack => Self::Ack {
                counter: msg
                    .correlation()
                    .ok_or(ParseError::MissingCounter { kind })?,
            },
            MessageType::Nack => Self::Nack {
                counter: msg
                    .correlation()
                    .ok_or(ParseError::MissingCounter { kind })?,
            },
            MessageType::Heartbeat => Self::Heartbeat { counter: msg.mc },
            MessageType::ConnectionStart => Self::ConnectionStart {
                device_id: msg.require_str("device_id")?,
                connection_id: msg.require_str("connection_id")?,
                info: msg.payload.clone().unwrap_or(Value::Null),
            },
            MessageType::ScInitResponse => Self::ScInitResponse,
            MessageType::ScPublicKey => Self::PublicKey {
                public_key: msg.require_str("public_key")?,
            },
            MessageType::ScAck => Self::SecretAck {
                sc_id: msg.payload_str("sc_id").map(str::to_owned),
            },
            MessageType::LoginResponse => Self::LoginResponse {
                token: msg
                    .payload_str("token")
                    .filter(|t| !t.is_empty())
                    .map(str::to_owned),
            },
            MessageType::TokenApplyAck => Self::TokenApplyAck,
            MessageType::TokenRenewResponse => Self::TokenRenewResponse {
                token: msg.require_str("token")?,
            },
            MessageType::SetAllData | MessageType::SetHomeData => Self::Discovery {
                payload: msg.payload.unwrap_or(Value::Null),
            },
            MessageType::StateUpdate => Self::StateUpdate {
                payload: msg.payload.unwrap_or(Value::Null),
            },
            MessageType::ErrorInfo => Self::ErrorInfo {
                payload: msg.payload.unwrap_or(Value::Null),
            },
            MessageType::SetBridgeState => Self::BridgeState {
                payload: msg.payload.unwrap_or(Value::Null),
            },
            _ => Self::Other {
                kind,
                payload: msg.payload,
            },
        };
        Ok(parsed)
    }
}

// ── Framing ─────────────────────────────────────────────────────────

/// Split one websocket message into protocol frames.
///
/// Frames are separated by EOT or NUL; empty segments are dropped.
pub fn split_frames(raw: &str) -> impl Iterator<Item = &str> {
    raw.split([FRAME_TERMINATOR, '\0'])
        .map(str::trim)
        .filter(|frame| !frame.is_empty())
}

/// Whether a frame is plain (pre-handshake) JSON rather than ciphertext.
pub fn is_plain_frame(frame: &str) -> bool {
    frame.trim_start().starts_with('{')
}

// ── Tests ───────────────────────────────────────────────────────────
