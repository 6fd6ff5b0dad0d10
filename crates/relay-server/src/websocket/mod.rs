//! WebSocket connection handles, registry, fan-out, and the per-connection
//! session loops for both endpoints.

pub mod broadcast;
pub mod chat;
pub mod connection;
pub mod feed;
pub mod heartbeat;
pub mod message;
pub mod registry;
