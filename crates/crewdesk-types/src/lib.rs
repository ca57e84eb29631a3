//! Shared types for the crewdesk chat core: REST payloads, realtime events and
//! the domain enums both sides of the wire agree on.

pub mod api;
pub mod events;
pub mod models;
