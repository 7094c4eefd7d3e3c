//! State and control layer between `bridgelink-api` and consumers.
//!
//! - **[`Bridge`]**: facade managing the full lifecycle.
//!   [`connect()`](Bridge::connect) opens the socket, drives the handshake
//!   and waits for discovery; afterwards heartbeat, watchdog and automatic
//!   reconnect keep the session alive until
//!   [`disconnect()`](Bridge::disconnect).
//!
//! - **Entity stores** ([`store`]): `DashMap`-backed device and room stores
//!   with `watch` snapshots and per-entity listener registries. State
//!   deltas are applied immediately; listener dispatch is coalesced per
//!   entity and runs off the reader path.
//!
//! - **[`Command`]**: typed control operations. Dim requests go through a
//!   per-device [`CommandDebouncer`]; every command is sent reliably
//!   (ACK-tracked, retried, serialized).
//!
//! - **[`BridgeEvent`]**: lifecycle events on a broadcast channel.

pub mod bridge;
pub mod command;
pub mod config;
pub mod convert;
pub mod error;
pub mod event;
mod handler;
pub mod model;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bridge::{Bridge, ConnectionState};
pub use command::{Command, CommandDebouncer, Debounced, RoomOperation, scale_dim_value};
pub use config::BridgeConfig;
pub use error::CoreError;
pub use event::BridgeEvent;
pub use model::{Capabilities, Device, DeviceState, Room, RoomState};
pub use store::{DeviceStore, EntityStore, ListenerId, RoomStore};
