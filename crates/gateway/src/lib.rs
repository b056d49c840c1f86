//! The weft gateway: HTTP/WS surface over the timeline subsystem.
//!
//! Hosts the session rooms (WebSocket fan-out), the timeline read API,
//! the message submit endpoint, and the live agent-bridge implementation
//! that the timeline service consumes.

pub mod api;
pub mod bridge;
pub mod cli;
pub mod rooms;
pub mod sessions;
pub mod state;
