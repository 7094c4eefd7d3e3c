// bridgelink-api: encrypted websocket protocol client for home-automation bridges

pub mod connection;
pub mod crypto;
pub mod error;
pub mod handshake;
pub mod protocol;
pub mod websocket;

pub use connection::{ConnectionConfig, ConnectionManager, SendReceipt};
pub use crypto::SessionKeys;
pub use error::Error;
pub use handshake::{AuthProgress, Authenticator, HandshakeState};
pub use protocol::{MessageCounter, MessageType, ParseError, ParsedMessage, ProtocolMessage};
pub use websocket::{ABNORMAL_CLOSURE, ReconnectConfig, SocketHandle, TransportEvent};
