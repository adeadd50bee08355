//! Subscription kinds and the typed payloads they deliver.
//!
//! Only three push streams are understood: `newHeads`,
//! `newPendingTransactions` and `syncing`. Each notification's
//! `params.result` is decoded according to the kind the subscription was
//! opened with; payloads that do not fit are dropped by the caller.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A unique subscription ID returned by `eth_subscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub String);

impl From<String> for SubscriptionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SubscriptionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The event categories a subscription can be opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    NewHeads,
    NewPendingTransactions,
    Syncing,
}

impl SubscriptionKind {
    /// The name passed as the first `eth_subscribe` parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewHeads => "newHeads",
            Self::NewPendingTransactions => "newPendingTransactions",
            Self::Syncing => "syncing",
        }
    }

    /// Decode a notification payload for this kind.
    ///
    /// Returns `None` if the payload does not have the expected shape.
    pub fn decode(&self, payload: &Value) -> Option<SubscriptionEvent> {
        match self {
            Self::NewHeads => BlockHeader::deserialize(payload)
                .ok()
                .map(SubscriptionEvent::NewHead),
            Self::NewPendingTransactions => payload
                .as_str()
                .map(|hash| SubscriptionEvent::PendingTransaction(hash.to_string())),
            Self::Syncing => SyncStatus::from_value(payload).map(SubscriptionEvent::SyncStatus),
        }
    }
}

impl std::fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubscriptionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "newHeads" => Ok(Self::NewHeads),
            "newPendingTransactions" => Ok(Self::NewPendingTransactions),
            "syncing" => Ok(Self::Syncing),
            other => Err(format!("unsupported subscription kind: {other}")),
        }
    }
}

/// A new block header pushed by a `newHeads` subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    #[serde(deserialize_with = "quantity")]
    pub number: u64,
    pub hash: String,
    pub parent_hash: String,
    #[serde(deserialize_with = "quantity")]
    pub timestamp: u64,
    #[serde(default)]
    pub miner: Option<String>,
    #[serde(default, deserialize_with = "opt_quantity")]
    pub gas_limit: Option<u64>,
    #[serde(default, deserialize_with = "opt_quantity")]
    pub gas_used: Option<u64>,
    #[serde(default, deserialize_with = "opt_quantity")]
    pub base_fee_per_gas: Option<u64>,
    /// Every other header field, untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Progress reported while the node is catching up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    #[serde(deserialize_with = "quantity")]
    pub starting_block: u64,
    #[serde(deserialize_with = "quantity")]
    pub current_block: u64,
    #[serde(deserialize_with = "quantity")]
    pub highest_block: u64,
}

/// Sync state pushed by a `syncing` subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    NotSyncing,
    Syncing(SyncProgress),
}

impl SyncStatus {
    /// Accepts `false`, `{"syncing": false}`, `{"syncing": true, "status": {..}}`
    /// and a bare progress object.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(false) => Some(Self::NotSyncing),
            Value::Object(obj) => match obj.get("syncing") {
                Some(Value::Bool(false)) => Some(Self::NotSyncing),
                Some(Value::Bool(true)) => obj
                    .get("status")
                    .and_then(|s| SyncProgress::deserialize(s).ok())
                    .map(Self::Syncing),
                Some(_) => None,
                None => SyncProgress::deserialize(value).ok().map(Self::Syncing),
            },
            _ => None,
        }
    }

    pub fn is_syncing(&self) -> bool {
        matches!(self, Self::Syncing(_))
    }
}

/// A decoded notification delivered to a subscription's listener.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    NewHead(BlockHeader),
    PendingTransaction(String),
    SyncStatus(SyncStatus),
}

/// Client-wide notifications, fanned out to every observer.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The socket reopened after a reconnect cycle. Subscriptions from the
    /// previous session are gone and must be re-established.
    Reconnected,
    NewHead(BlockHeader),
    PendingTransaction(String),
    SyncStatus(SyncStatus),
}

impl From<SubscriptionEvent> for ClientEvent {
    fn from(event: SubscriptionEvent) -> Self {
        match event {
            SubscriptionEvent::NewHead(h) => Self::NewHead(h),
            SubscriptionEvent::PendingTransaction(tx) => Self::PendingTransaction(tx),
            SubscriptionEvent::SyncStatus(s) => Self::SyncStatus(s),
        }
    }
}

// Quantities arrive as `0x`-prefixed hex strings; some nodes send plain numbers.

fn parse_quantity(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => {
            let digits = s.strip_prefix("0x").unwrap_or(s);
            u64::from_str_radix(digits, 16).ok()
        }
        _ => None,
    }
}

fn quantity<'de, D: Deserializer<'de>>(de: D) -> Result<u64, D::Error> {
    let value = Value::deserialize(de)?;
    parse_quantity(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid quantity: {value}")))
}

fn opt_quantity<'de, D: Deserializer<'de>>(de: D) -> Result<Option<u64>, D::Error> {
    let value = Value::deserialize(de)?;
    if value.is_null() {
        return Ok(None);
    }
    parse_quantity(&value)
        .map(Some)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid quantity: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_new_head() {
        let payload = json!({
            "number": "0x1b4",
            "hash": "0xdc0818cf78f21a8e70579cb46a43643f78291264dda342ae31049421c82d21ae",
            "parentHash": "0x6a9a7a5f4fd8a3d5a1c2bba3a8a3b2f3c9e8d4a1b2c3d4e5f60718293a4b5c6d",
            "timestamp": "0x55ba467c",
            "gasLimit": "0x1388",
            "gasUsed": "0x0",
            "difficulty": "0x0"
        });
        let event = SubscriptionKind::NewHeads.decode(&payload).unwrap();
        let SubscriptionEvent::NewHead(header) = event else {
            panic!("expected a header");
        };
        assert_eq!(header.number, 0x1b4);
        assert_eq!(header.timestamp, 0x55ba467c);
        assert_eq!(header.gas_limit, Some(0x1388));
        assert_eq!(header.base_fee_per_gas, None);
        assert_eq!(header.extra.get("difficulty"), Some(&json!("0x0")));
    }

    #[test]
    fn decode_head_rejects_missing_fields() {
        assert!(SubscriptionKind::NewHeads.decode(&json!({"number": "0x1"})).is_none());
        assert!(SubscriptionKind::NewHeads.decode(&json!("0xabc")).is_none());
    }

    #[test]
    fn decode_pending_transaction() {
        let event = SubscriptionKind::NewPendingTransactions
            .decode(&json!("0xd6fdc5cc41a9959e922f30cb772a9aef46f4daea279307bc5f7024edc4ccd7fa"))
            .unwrap();
        assert!(matches!(event, SubscriptionEvent::PendingTransaction(ref h) if h.starts_with("0xd6fd")));
        assert!(SubscriptionKind::NewPendingTransactions.decode(&json!(12)).is_none());
    }

    #[test]
    fn decode_sync_status_shapes() {
        let kind = SubscriptionKind::Syncing;
        assert_eq!(
            kind.decode(&json!(false)),
            Some(SubscriptionEvent::SyncStatus(SyncStatus::NotSyncing))
        );
        assert_eq!(
            kind.decode(&json!({"syncing": false})),
            Some(SubscriptionEvent::SyncStatus(SyncStatus::NotSyncing))
        );

        let expected = SyncStatus::Syncing(SyncProgress {
            starting_block: 0,
            current_block: 0x10,
            highest_block: 0x20,
        });
        let wrapped = json!({
            "syncing": true,
            "status": {"startingBlock": "0x0", "currentBlock": "0x10", "highestBlock": "0x20"}
        });
        assert_eq!(kind.decode(&wrapped), Some(SubscriptionEvent::SyncStatus(expected)));

        let bare = json!({"startingBlock": 0, "currentBlock": 16, "highestBlock": 32});
        assert_eq!(kind.decode(&bare), Some(SubscriptionEvent::SyncStatus(expected)));

        assert!(kind.decode(&json!(true)).is_none());
        assert!(kind.decode(&json!({"syncing": "yes"})).is_none());
    }

    #[test]
    fn kind_round_trips_through_its_name() {
        for kind in [
            SubscriptionKind::NewHeads,
            SubscriptionKind::NewPendingTransactions,
            SubscriptionKind::Syncing,
        ] {
            assert_eq!(kind.as_str().parse::<SubscriptionKind>().unwrap(), kind);
        }
        assert!("logs".parse::<SubscriptionKind>().is_err());
    }
}
