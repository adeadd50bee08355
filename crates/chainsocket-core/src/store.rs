//! Shared call and subscription tables.
//!
//! Every outstanding call lives in exactly one of two tables: *queued*
//! (accepted while the socket was connecting, not yet written) or
//! *in-flight* (written, awaiting its reply). Active subscriptions map a
//! server-assigned id to the listener that receives its events.
//!
//! All access goes through one mutex. No operation performs I/O or runs
//! caller code while holding it: removals hand the owned [`PendingCall`]
//! back, and the caller completes it after the lock is released.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot};

use crate::error::RpcError;
use crate::events::{SubscriptionEvent, SubscriptionId, SubscriptionKind};
use crate::request::RawResponse;

/// Largest id handed out before the counter wraps back to 1. Ids above
/// 2^53 - 1 are not represented exactly by every JSON implementation.
pub const MAX_SAFE_ID: u64 = (1 << 53) - 1;

/// Sending half of a call's one-shot completion.
pub type Completion = oneshot::Sender<Result<RawResponse, RpcError>>;

/// Receiving half of a call's one-shot completion.
pub type ReplyReceiver = oneshot::Receiver<Result<RawResponse, RpcError>>;

/// Where a subscription's decoded events go.
#[derive(Debug, Clone)]
pub struct SubscriptionListener {
    pub kind: SubscriptionKind,
    pub sender: mpsc::UnboundedSender<SubscriptionEvent>,
}

impl SubscriptionListener {
    pub fn new(kind: SubscriptionKind) -> (Self, mpsc::UnboundedReceiver<SubscriptionEvent>) {
        let (sender, rx) = mpsc::unbounded_channel();
        (Self { kind, sender }, rx)
    }
}

/// A call accepted by the client and not yet resolved.
#[derive(Debug)]
pub struct PendingCall {
    id: u64,
    method: String,
    payload: String,
    completion: Completion,
    listener: Option<SubscriptionListener>,
}

impl PendingCall {
    pub fn new(id: u64, method: impl Into<String>, payload: String, completion: Completion) -> Self {
        Self {
            id,
            method: method.into(),
            payload,
            completion,
            listener: None,
        }
    }

    /// Attach the listener to install once a subscribe call's reply names
    /// its subscription id.
    pub fn with_listener(mut self, listener: SubscriptionListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// The encoded request text.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn take_listener(&mut self) -> Option<SubscriptionListener> {
        self.listener.take()
    }

    /// Resolve the call. Consumes it, so a call resolves at most once.
    pub fn complete(self, result: Result<RawResponse, RpcError>) {
        // The caller may have stopped waiting; that is not our concern.
        let _ = self.completion.send(result);
    }

    pub fn fail(self, err: RpcError) {
        self.complete(Err(err));
    }
}

struct Tables {
    next_id: u64,
    queued: BTreeMap<u64, PendingCall>,
    in_flight: HashMap<u64, PendingCall>,
    subscriptions: HashMap<SubscriptionId, SubscriptionListener>,
}

impl Tables {
    fn is_alive(&self, id: u64) -> bool {
        self.queued.contains_key(&id) || self.in_flight.contains_key(&id)
    }
}

/// Thread-safe call and subscription tables plus the id counter.
pub struct StateStore {
    tables: Mutex<Tables>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables {
                next_id: 1,
                queued: BTreeMap::new(),
                in_flight: HashMap::new(),
                subscriptions: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        // Nothing in a critical section can leave the tables half-updated.
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand out the next call id, skipping any id still alive after a wrap.
    pub fn allocate_id(&self) -> u64 {
        let mut t = self.lock();
        loop {
            let id = t.next_id;
            t.next_id = if id >= MAX_SAFE_ID { 1 } else { id + 1 };
            if !t.is_alive(id) {
                return id;
            }
        }
    }

    /// Park a call until the socket opens.
    pub fn enqueue(&self, call: PendingCall) {
        let mut t = self.lock();
        t.in_flight.remove(&call.id);
        t.queued.insert(call.id, call);
    }

    /// Record a call as written to the socket.
    pub fn promote_to_in_flight(&self, call: PendingCall) {
        let mut t = self.lock();
        t.queued.remove(&call.id);
        t.in_flight.insert(call.id, call);
    }

    pub fn remove_queued(&self, id: u64) -> Option<PendingCall> {
        self.lock().queued.remove(&id)
    }

    pub fn remove_in_flight(&self, id: u64) -> Option<PendingCall> {
        self.lock().in_flight.remove(&id)
    }

    /// Take every queued call, in ascending id order.
    pub fn drain_queued(&self) -> Vec<PendingCall> {
        std::mem::take(&mut self.lock().queued).into_values().collect()
    }

    /// Take every in-flight call, in ascending id order.
    pub fn drain_in_flight(&self) -> Vec<PendingCall> {
        let drained = std::mem::take(&mut self.lock().in_flight);
        let mut calls: Vec<PendingCall> = drained.into_values().collect();
        calls.sort_by_key(PendingCall::id);
        calls
    }

    pub fn add_subscription(&self, id: SubscriptionId, listener: SubscriptionListener) {
        self.lock().subscriptions.insert(id, listener);
    }

    pub fn remove_subscription(&self, id: &SubscriptionId) -> Option<SubscriptionListener> {
        self.lock().subscriptions.remove(id)
    }

    /// A copy of the listener registered under `id`, if any.
    pub fn listener(&self, id: &SubscriptionId) -> Option<SubscriptionListener> {
        self.lock().subscriptions.get(id).cloned()
    }

    /// Drop every subscription, returning the released listeners.
    pub fn clear_subscriptions(&self) -> Vec<SubscriptionListener> {
        std::mem::take(&mut self.lock().subscriptions)
            .into_values()
            .collect()
    }

    pub fn queued_len(&self) -> usize {
        self.lock().queued.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.lock().in_flight.len()
    }

    pub fn subscription_len(&self) -> usize {
        self.lock().subscriptions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(store: &StateStore) -> (PendingCall, ReplyReceiver) {
        let id = store.allocate_id();
        let (tx, rx) = oneshot::channel();
        (PendingCall::new(id, "eth_chainId", format!("req-{id}"), tx), rx)
    }

    #[test]
    fn ids_are_monotonic() {
        let store = StateStore::new();
        assert_eq!(store.allocate_id(), 1);
        assert_eq!(store.allocate_id(), 2);
        assert_eq!(store.allocate_id(), 3);
    }

    #[test]
    fn id_wraps_and_skips_live_ids() {
        let store = StateStore::new();
        let (live, _rx) = call(&store); // id 1 stays queued
        store.enqueue(live);
        store.lock().next_id = MAX_SAFE_ID;

        assert_eq!(store.allocate_id(), MAX_SAFE_ID);
        assert_eq!(store.allocate_id(), 2, "1 is still alive and must be skipped");
    }

    #[test]
    fn call_lives_in_one_table() {
        let store = StateStore::new();
        let (c, _rx) = call(&store);
        let id = c.id();
        store.enqueue(c);
        assert_eq!((store.queued_len(), store.in_flight_len()), (1, 0));

        let c = store.remove_queued(id).unwrap();
        store.promote_to_in_flight(c);
        assert_eq!((store.queued_len(), store.in_flight_len()), (0, 1));
        assert!(store.remove_queued(id).is_none());
        assert!(store.remove_in_flight(id).is_some());
        assert!(store.remove_in_flight(id).is_none());
    }

    #[test]
    fn drain_queued_is_ascending() {
        let store = StateStore::new();
        let mut calls: Vec<_> = (0..5).map(|_| call(&store)).collect();
        calls.reverse();
        let mut receivers = Vec::new();
        for (c, rx) in calls {
            store.enqueue(c);
            receivers.push(rx);
        }
        let ids: Vec<u64> = store.drain_queued().iter().map(PendingCall::id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(store.queued_len(), 0);
    }

    #[test]
    fn complete_delivers_once() {
        let store = StateStore::new();
        let (c, mut rx) = call(&store);
        c.complete(Ok(RawResponse(json!({"id": 1, "result": "0x1"}))));
        let got = rx.try_recv().unwrap().unwrap();
        assert_eq!(got.result(), Some(&json!("0x1")));
    }

    #[test]
    fn drain_in_flight_fails_everything() {
        let store = StateStore::new();
        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (c, rx) = call(&store);
            store.promote_to_in_flight(c);
            receivers.push(rx);
        }
        for c in store.drain_in_flight() {
            c.fail(RpcError::InvalidConnection);
        }
        assert_eq!(store.in_flight_len(), 0);
        for mut rx in receivers {
            assert!(matches!(rx.try_recv().unwrap(), Err(RpcError::InvalidConnection)));
        }
    }

    #[test]
    fn subscriptions_register_and_clear() {
        let store = StateStore::new();
        let (listener, mut rx) = SubscriptionListener::new(SubscriptionKind::NewPendingTransactions);
        let id = SubscriptionId::from("0xdeadbeef");
        store.add_subscription(id.clone(), listener);

        let found = store.listener(&id).unwrap();
        found
            .sender
            .send(SubscriptionEvent::PendingTransaction("0x1".into()))
            .unwrap();
        assert_eq!(rx.try_recv().unwrap(), SubscriptionEvent::PendingTransaction("0x1".into()));
        drop(found);

        assert_eq!(store.clear_subscriptions().len(), 1);
        assert_eq!(store.subscription_len(), 0);
        assert!(store.listener(&id).is_none());
    }

    #[test]
    fn remove_subscription() {
        let store = StateStore::new();
        let (listener, _rx) = SubscriptionListener::new(SubscriptionKind::Syncing);
        let id = SubscriptionId::from("0x1");
        store.add_subscription(id.clone(), listener);
        assert!(store.remove_subscription(&id).is_some());
        assert!(store.remove_subscription(&id).is_none());
    }
}
