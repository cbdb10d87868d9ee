//! Streaming transport: connection lifecycle and the URL-keyed registry.

mod connection;
mod manager;

pub use connection::{ConnState, ConnectOptions, Connection, ReconnectPolicy, WsHandler};
pub use manager::ConnectionManager;
