//! JSON-RPC 2.0 wire types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::SubscriptionId;

/// JSON-RPC request ID: string, number or null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(u64),
    String(String),
    Null,
}

impl std::fmt::Display for RpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Null => write!(f, "null"),
        }
    }
}

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
    pub id: RpcId,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC 2.0 request.
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
            id: RpcId::Number(id),
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// The full parsed envelope of a reply frame, handed to the caller's
/// completion. Payload decoding happens later, against the caller's type.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse(pub Value);

impl RawResponse {
    /// The `result` member, if present.
    pub fn result(&self) -> Option<&Value> {
        self.0.get("result")
    }

    /// The `error` member, if present.
    pub fn error(&self) -> Option<&Value> {
        self.0.get("error")
    }

    pub fn into_inner(self) -> Value {
        self.0
    }
}

/// The minimal view of an inbound frame: just enough to route it.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Numeric `id` of a reply.
    pub id: Option<u64>,
    /// `params.subscription` of a push notification.
    pub subscription: Option<SubscriptionId>,
    /// The whole frame, parsed.
    pub body: Value,
}

impl Envelope {
    /// Locate the routing markers in a parsed frame.
    ///
    /// Returns `None` when the frame carries neither a numeric `id` nor a
    /// `params.subscription` string.
    pub fn from_value(body: Value) -> Option<Self> {
        let id = body.get("id").and_then(Value::as_u64);
        let subscription = body
            .get("params")
            .and_then(|p| p.get("subscription"))
            .and_then(Value::as_str)
            .map(|s| SubscriptionId(s.to_string()));
        if id.is_none() && subscription.is_none() {
            return None;
        }
        Some(Self { id, subscription, body })
    }

    /// The notification payload (`params.result`) of a push frame.
    pub fn notification_payload(&self) -> Option<&Value> {
        self.body.get("params").and_then(|p| p.get("result"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serialization() {
        let req = JsonRpcRequest::new(7, "eth_blockNumber", json!([]));
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"eth_blockNumber\""));
        assert!(json.contains("\"id\":7"));
    }

    #[test]
    fn envelope_finds_reply_id() {
        let env = Envelope::from_value(json!({"jsonrpc":"2.0","id":3,"result":"0x1"})).unwrap();
        assert_eq!(env.id, Some(3));
        assert!(env.subscription.is_none());
    }

    #[test]
    fn envelope_finds_subscription() {
        let env = Envelope::from_value(json!({
            "jsonrpc":"2.0",
            "method":"eth_subscription",
            "params":{"subscription":"0xabc","result":"0xdead"}
        }))
        .unwrap();
        assert_eq!(env.id, None);
        assert_eq!(env.subscription, Some(SubscriptionId("0xabc".into())));
        assert_eq!(env.notification_payload(), Some(&json!("0xdead")));
    }

    #[test]
    fn envelope_rejects_unmarked_frames() {
        assert!(Envelope::from_value(json!({"jsonrpc":"2.0","result":"0x1"})).is_none());
        assert!(Envelope::from_value(json!({"id":"abc","result":"0x1"})).is_none());
        assert!(Envelope::from_value(json!([1, 2, 3])).is_none());
    }
}
