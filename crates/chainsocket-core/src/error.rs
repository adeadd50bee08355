//! Error types delivered to callers and raised by collaborators.

use thiserror::Error;

use crate::request::JsonRpcError;

/// Errors raised by a transport collaborator.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The socket could not be established (refused, DNS, TLS handshake, ...).
    #[error("connect failed: {0}")]
    Connect(String),

    /// The socket was not established within the configured timeout.
    #[error("connect timed out after {ms}ms")]
    ConnectTimeout { ms: u64 },

    /// A frame could not be written.
    #[error("send failed: {0}")]
    Send(String),

    /// The session (or the client task driving it) is gone.
    #[error("transport closed")]
    Closed,

    /// An unexpected error.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` if this is a connect timeout, the one connect failure
    /// that triggers the reconnect path.
    pub fn is_connect_timeout(&self) -> bool {
        matches!(self, Self::ConnectTimeout { .. })
    }
}

/// A codec could not encode a request.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct EncodeError(pub String);

impl From<serde_json::Error> for EncodeError {
    fn from(e: serde_json::Error) -> Self {
        Self(e.to_string())
    }
}

/// The outcome of a failed call, as seen by the caller.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// The request could not be encoded; it never left the client.
    #[error("encode issue: {0}")]
    EncodeIssue(String),

    /// Submitted, or still queued, while the connection was not open.
    #[error("connection not open")]
    ConnectionNotOpen,

    /// Sent, but the socket closed before the reply arrived.
    #[error("invalid connection")]
    InvalidConnection,

    /// Sent, but invalidated because the client started reconnecting.
    #[error("pending requests on reconnecting")]
    PendingRequestsOnReconnecting,

    /// Queued, but the reconnect budget ran out before the socket reopened.
    #[error("max attempts reached on reconnecting")]
    MaxAttemptsReachedOnReconnecting,

    /// The transport failed while handling this call.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The node answered with a JSON-RPC error object.
    #[error("execution error {}: {}", .0.code, .0.message)]
    Execution(JsonRpcError),

    /// The reply matched none of the expected shapes.
    #[error("no result")]
    NoResult,
}

impl From<EncodeError> for RpcError {
    fn from(e: EncodeError) -> Self {
        Self::EncodeIssue(e.0)
    }
}

impl RpcError {
    /// Returns `true` if the call was failed because of connection state,
    /// not because of anything the node said. Such calls are safe to resubmit.
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            Self::ConnectionNotOpen
                | Self::InvalidConnection
                | Self::PendingRequestsOnReconnecting
                | Self::MaxAttemptsReachedOnReconnecting
        )
    }

    /// Returns `true` if this is a node-side execution error.
    pub fn is_execution_error(&self) -> bool {
        matches!(self, Self::Execution(_))
    }
}
