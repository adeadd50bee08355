//! Connection-level policy. Individual calls are never retried; only the
//! socket is re-established.

pub mod reconnect;

pub use reconnect::{ReconnectConfig, ReconnectPolicy};
