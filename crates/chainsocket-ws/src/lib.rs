//! chainsocket-ws — persistent WebSocket JSON-RPC client with auto-reconnect.
//!
//! # Features
//! - Calls made while connecting are queued and flushed in order on open
//! - Auto-reconnect on disconnect (exponential backoff, optional attempt cap)
//! - Subscription management (eth_subscribe / eth_unsubscribe)
//! - Request multiplexing over a single connection
//! - Every call resolves exactly once, with its reply or a typed error

pub mod client;
pub mod config;
mod correlator;
pub mod machine;
mod subscriptions;
pub mod transport;

pub use client::{no_params, WsRpcClient};
pub use config::{ConfigError, WsClientConfig};
pub use machine::{ConnectionState, NORMAL_CLOSURE};
pub use transport::WsTransport;
