//! Codec hook between the client and the wire, and reply decoding.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{EncodeError, RpcError};
use crate::request::{Envelope, JsonRpcError, JsonRpcRequest, RawResponse};

/// Encodes outbound calls and locates routing markers in inbound frames.
///
/// The client never looks past the [`Envelope`]; typed payload decoding is
/// left to [`decode_reply`] and [`crate::events::SubscriptionKind::decode`].
pub trait Codec: Send + Sync + 'static {
    /// Encode a call as frame text.
    fn encode_request(&self, method: &str, params: &Value, id: u64) -> Result<String, EncodeError>;

    /// Parse a frame far enough to route it. `None` drops the frame.
    fn decode_envelope(&self, text: &str) -> Option<Envelope>;
}

/// JSON-RPC 2.0 over `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode_request(&self, method: &str, params: &Value, id: u64) -> Result<String, EncodeError> {
        if method.is_empty() {
            return Err(EncodeError("empty method name".into()));
        }
        let req = JsonRpcRequest::new(id, method, params.clone());
        Ok(serde_json::to_string(&req)?)
    }

    fn decode_envelope(&self, text: &str) -> Option<Envelope> {
        let body = serde_json::from_str::<Value>(text).ok()?;
        Envelope::from_value(body)
    }
}

/// A decoded reply: most methods return one value, some return a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply<T> {
    Single(T),
    Batch(Vec<T>),
}

impl<T> Reply<T> {
    /// The single value, or `NoResult` if the node sent a batch.
    pub fn into_single(self) -> Result<T, RpcError> {
        match self {
            Self::Single(v) => Ok(v),
            Self::Batch(_) => Err(RpcError::NoResult),
        }
    }

    /// Every value, whichever shape arrived.
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::Single(v) => vec![v],
            Self::Batch(vs) => vs,
        }
    }
}

/// Decode a reply envelope, trying in order: a single `T`, a sequence of
/// `T`, a structured JSON-RPC error. Anything else is `NoResult`.
pub fn decode_reply<T: DeserializeOwned>(raw: &RawResponse) -> Result<Reply<T>, RpcError> {
    if let Some(result) = raw.result() {
        if let Ok(single) = T::deserialize(result) {
            return Ok(Reply::Single(single));
        }
        if let Ok(batch) = Vec::<T>::deserialize(result) {
            return Ok(Reply::Batch(batch));
        }
    }
    if let Some(error) = raw.error() {
        if let Ok(err) = JsonRpcError::deserialize(error) {
            return Err(RpcError::Execution(err));
        }
    }
    Err(RpcError::NoResult)
}
