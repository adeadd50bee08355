//! Request/response correlation.
//!
//! Allocates call ids, decides queue-vs-send from the connection state, and
//! matches reply frames back to the call that is waiting for them.

use std::sync::Arc;

use serde_json::Value;

use chainsocket_core::codec::Codec;
use chainsocket_core::error::RpcError;
use chainsocket_core::events::SubscriptionId;
use chainsocket_core::request::{Envelope, RawResponse};
use chainsocket_core::store::{Completion, PendingCall, StateStore, SubscriptionListener};

use crate::machine::ConnectionState;
use crate::subscriptions::SubscriptionDemux;

/// A call as submitted by a caller, before it has an id.
pub(crate) struct CallRequest {
    pub method: String,
    pub params: Value,
    pub completion: Completion,
    pub listener: Option<SubscriptionListener>,
}

/// What the connection machine has to do after a submission.
#[derive(Debug, PartialEq)]
pub(crate) enum Dispatch {
    /// Nothing: the call was queued or already failed.
    Done,
    /// The call is in-flight; write `payload` to the socket.
    Send { id: u64, payload: String },
}

pub(crate) struct Correlator {
    store: Arc<StateStore>,
    codec: Arc<dyn Codec>,
}

impl Correlator {
    pub fn new(store: Arc<StateStore>, codec: Arc<dyn Codec>) -> Self {
        Self { store, codec }
    }

    /// Accept a call: allocate its id, encode it, then queue it, fail it, or
    /// register it in-flight depending on `state`.
    pub fn submit(&self, req: CallRequest, state: ConnectionState) -> Dispatch {
        let id = self.store.allocate_id();
        let payload = match self.codec.encode_request(&req.method, &req.params, id) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!(method = %req.method, error = %e, "failed to encode call");
                let _ = req.completion.send(Err(RpcError::EncodeIssue(e.0)));
                return Dispatch::Done;
            }
        };

        let mut call = PendingCall::new(id, req.method, payload, req.completion);
        if let Some(listener) = req.listener {
            call = call.with_listener(listener);
        }

        match state {
            ConnectionState::Connecting => {
                tracing::debug!(id, method = call.method(), "queueing call until connected");
                self.store.enqueue(call);
                Dispatch::Done
            }
            ConnectionState::Closed => {
                call.fail(RpcError::ConnectionNotOpen);
                Dispatch::Done
            }
            ConnectionState::Open => {
                let (id, payload) = self.register_in_flight(call);
                Dispatch::Send { id, payload }
            }
        }
    }

    /// Record `call` as in-flight and return what to write.
    pub fn register_in_flight(&self, call: PendingCall) -> (u64, String) {
        let id = call.id();
        let payload = call.payload().to_string();
        self.store.promote_to_in_flight(call);
        (id, payload)
    }

    /// The socket refused a frame: fail the call that was riding on it.
    pub fn fail_in_flight(&self, id: u64, err: RpcError) {
        if let Some(call) = self.store.remove_in_flight(id) {
            call.fail(err);
        }
    }

    /// Resolve the in-flight call matching `envelope.id`.
    ///
    /// Returns `false` for unmatched ids, which are stale or duplicate
    /// replies and are dropped.
    pub fn resolve(&self, envelope: &Envelope, demux: &SubscriptionDemux) -> bool {
        let Some(id) = envelope.id else {
            return false;
        };
        let Some(mut call) = self.store.remove_in_flight(id) else {
            tracing::debug!(id, "dropping reply with no pending call");
            return false;
        };

        // A subscribe reply installs its listener before the caller hears
        // back, so notifications right behind the reply are not lost.
        if let Some(listener) = call.take_listener() {
            match envelope.body.get("result").and_then(Value::as_str) {
                Some(sub_id) => {
                    tracing::debug!(subscription = sub_id, kind = %listener.kind, "subscription registered");
                    demux.subscribe(SubscriptionId(sub_id.to_string()), listener);
                }
                None => tracing::debug!(id, "subscribe reply carried no subscription id"),
            }
        }

        call.complete(Ok(RawResponse(envelope.body.clone())));
        true
    }
}
