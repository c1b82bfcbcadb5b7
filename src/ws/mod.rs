//! WebSocket protocol, broadcast groups and connection handling

pub mod handler;
pub mod hub;
pub mod protocol;
