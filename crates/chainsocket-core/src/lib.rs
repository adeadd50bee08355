//! chainsocket-core — building blocks for the chainsocket client.
//!
//! # Overview
//!
//! The core crate holds everything that does no I/O of its own:
//!
//! - [`StateStore`]: queued / in-flight call tables and subscription listeners
//! - [`ReconnectPolicy`]: backoff delay and attempt budget
//! - [`Codec`] / [`JsonCodec`]: request encoding and envelope routing
//! - [`decode_reply`]: ordered-fallback reply decoding into [`Reply`]
//! - [`Transport`]: the socket boundary the client drives
//! - [`RpcError`] / [`TransportError`]: structured error types
//! - [`events`]: subscription kinds and their typed payloads

pub mod codec;
pub mod error;
pub mod events;
pub mod policy;
pub mod request;
pub mod store;
pub mod transport;

pub use codec::{decode_reply, Codec, JsonCodec, Reply};
pub use error::{EncodeError, RpcError, TransportError};
pub use events::{
    BlockHeader, ClientEvent, SubscriptionEvent, SubscriptionId, SubscriptionKind, SyncProgress,
    SyncStatus,
};
pub use policy::{ReconnectConfig, ReconnectPolicy};
pub use request::{Envelope, JsonRpcError, JsonRpcRequest, RawResponse, RpcId};
pub use store::{PendingCall, ReplyReceiver, StateStore, SubscriptionListener};
pub use transport::{FrameSink, FrameStream, Session, Transport, TransportConfig, TransportEvent};
