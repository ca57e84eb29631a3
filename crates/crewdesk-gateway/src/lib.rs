//! Realtime fan-out: an in-memory registry of live connections grouped into
//! `room:<id>` and `user:<id>` channels, plus the WebSocket loop that feeds it.
//!
//! This layer is a relay. It never touches the message store; the only
//! authorization it performs is the injected [`RoomGate`] check on joins.

pub mod connection;
pub mod dispatcher;

pub use connection::{Session, handle_command, handle_connection};
pub use dispatcher::{ConnectionId, Dispatcher, FanoutStats, RoomGate};
