//! WebSocket subscription demultiplexing.
//!
//! Routes `eth_subscription` notifications to the listener registered under
//! their subscription id. Listeners only live as long as the socket they
//! were opened on: every close releases all of them.

use std::sync::Arc;

use tokio::sync::broadcast;

use chainsocket_core::events::{ClientEvent, SubscriptionId};
use chainsocket_core::request::Envelope;
use chainsocket_core::store::{StateStore, SubscriptionListener};

/// Dispatches push notifications to per-subscription listeners and to the
/// client-wide event broadcast.
#[derive(Clone)]
pub(crate) struct SubscriptionDemux {
    store: Arc<StateStore>,
    events: broadcast::Sender<ClientEvent>,
}

impl SubscriptionDemux {
    pub fn new(store: Arc<StateStore>, events: broadcast::Sender<ClientEvent>) -> Self {
        Self { store, events }
    }

    pub fn subscribe(&self, id: SubscriptionId, listener: SubscriptionListener) {
        self.store.add_subscription(id, listener);
    }

    /// Returns `true` if a listener was registered under `id`.
    pub fn unsubscribe(&self, id: &SubscriptionId) -> bool {
        self.store.remove_subscription(id).is_some()
    }

    /// Release every listener without sending it anything; their receivers
    /// observe the closed channel.
    pub fn clear(&self) -> usize {
        self.store.clear_subscriptions().len()
    }

    /// Deliver a notification frame. Returns `false` if it was dropped
    /// (unknown subscription or a payload that does not fit its kind).
    pub fn dispatch(&self, envelope: &Envelope) -> bool {
        let Some(id) = envelope.subscription.as_ref() else {
            return false;
        };
        let Some(listener) = self.store.listener(id) else {
            tracing::debug!(subscription = %id, "dropping notification for unknown subscription");
            return false;
        };
        let Some(event) = envelope
            .notification_payload()
            .and_then(|payload| listener.kind.decode(payload))
        else {
            tracing::debug!(subscription = %id, kind = %listener.kind, "dropping undecodable notification");
            return false;
        };

        if listener.sender.send(event.clone()).is_err() {
            tracing::debug!(subscription = %id, "listener gone, releasing subscription");
            self.store.remove_subscription(id);
        }
        let _ = self.events.send(event.into());
        true
    }
}
