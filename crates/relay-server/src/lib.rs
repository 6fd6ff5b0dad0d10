//! # relay-server
//!
//! Axum `WebSocket` server with two endpoints:
//!
//! - **chat**: every message a client sends is fanned out to the other
//!   registered clients through the [`ConnectionRegistry`] and
//!   [`Broadcaster`]
//! - **feed**: each client gets a server-generated, timestamped payload on
//!   a fixed interval; feed clients never touch the registry
//!
//! Plus `/health`, `/metrics`, and graceful shutdown via `CancellationToken`.

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod ids;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::RelayError;
pub use ids::ConnectionId;
pub use server::{AppState, RelayServer};
pub use shutdown::ShutdownCoordinator;
pub use websocket::broadcast::{BroadcastReport, Broadcaster, EchoPolicy};
pub use websocket::chat::ChatTermination;
pub use websocket::connection::{ConnectionHandle, Inbound, Received};
pub use websocket::feed::{FeedSource, FeedTermination, OrderbookTicker};
pub use websocket::message::RelayMessage;
pub use websocket::registry::ConnectionRegistry;
