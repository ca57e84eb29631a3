//! HTTP surface of the chat core: credential checks, the room membership
//! authority, the message store and the axum router that ties them to the
//! realtime gateway.

pub mod access;
pub mod auth;
pub mod directory;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod rooms;
pub mod routes;
pub mod store;
pub mod unread;

pub use auth::{AppState, AppStateInner, Caller};
pub use error::ChatError;
pub use routes::router;
