//! Client side of the chat core: a REST client, a self-healing realtime link
//! and the session controller that keeps one open room's timeline in step
//! with both.

pub mod api;
pub mod error;
pub mod link;
pub mod session;
pub mod timeline;
pub mod typing;

pub use api::{ChatApi, HttpChatApi};
pub use error::ClientError;
pub use link::{LinkEvent, Outbox, RealtimeLink};
pub use session::{FetchTicket, PendingSend, SessionController};
pub use timeline::{Timeline, TimelineEntry};
