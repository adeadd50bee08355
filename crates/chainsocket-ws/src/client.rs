//! WebSocket JSON-RPC client with auto-reconnect and subscription management.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use chainsocket_core::codec::{decode_reply, Codec, JsonCodec, Reply};
use chainsocket_core::error::{RpcError, TransportError};
use chainsocket_core::events::{ClientEvent, SubscriptionEvent, SubscriptionId, SubscriptionKind};
use chainsocket_core::policy::ReconnectPolicy;
use chainsocket_core::request::RawResponse;
use chainsocket_core::store::{ReplyReceiver, StateStore, SubscriptionListener};
use chainsocket_core::transport::Transport;

use crate::config::WsClientConfig;
use crate::machine::{Command, ConnectionMachine, ConnectionState, MachineParts};
use crate::transport::WsTransport;

const EVENT_CAPACITY: usize = 256;

/// WebSocket JSON-RPC client.
///
/// Maintains a background task that owns the WebSocket connection, queues
/// calls made while connecting, and reconnects with exponential backoff
/// when the socket drops. Calls in flight when the socket drops are failed,
/// never replayed; subscriptions end with the socket and must be opened
/// again after [`ClientEvent::Reconnected`].
///
/// Must be created inside a Tokio runtime. Dropping the client closes the
/// socket and fails whatever is still outstanding.
pub struct WsRpcClient {
    url: String,
    cmd_tx: mpsc::UnboundedSender<Command>,
    store: Arc<StateStore>,
    state_rx: watch::Receiver<ConnectionState>,
    cycle_rx: watch::Receiver<bool>,
    events: broadcast::Sender<ClientEvent>,
}

impl WsRpcClient {
    /// Create a client for `url` over [`WsTransport`].
    pub fn new(url: impl Into<String>, config: WsClientConfig) -> Self {
        Self::with_transport(url, config, Arc::new(WsTransport::new()))
    }

    /// Create a client over a custom transport.
    pub fn with_transport(
        url: impl Into<String>,
        config: WsClientConfig,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self::with_codec(url, config, transport, Arc::new(JsonCodec))
    }

    /// Create a client over a custom transport and codec.
    pub fn with_codec(
        url: impl Into<String>,
        config: WsClientConfig,
        transport: Arc<dyn Transport>,
        codec: Arc<dyn Codec>,
    ) -> Self {
        let url = url.into();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Closed);
        let (cycle_tx, cycle_rx) = watch::channel(false);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let store = Arc::new(StateStore::new());

        let machine = ConnectionMachine::new(
            MachineParts {
                url: url.clone(),
                transport,
                transport_config: config.transport(),
                policy: ReconnectPolicy::new(config.reconnect()),
                codec,
                store: Arc::clone(&store),
                state_tx,
                cycle_tx,
                events: events.clone(),
            },
            cmd_rx,
        );
        tokio::spawn(machine.run());

        if config.automatic_open {
            let _ = cmd_tx.send(Command::Connect { done: None });
        }

        Self {
            url,
            cmd_tx,
            store,
            state_rx,
            cycle_rx,
            events,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// A watch over connection state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Whether a reconnect cycle is under way (timer pending or an attempt
    /// running).
    pub fn is_reconnecting(&self) -> bool {
        *self.cycle_rx.borrow()
    }

    /// Wait until the socket is open again.
    ///
    /// Resolves immediately while open. Fails with
    /// [`RpcError::ConnectionNotOpen`] once the client settles in `Closed`
    /// with no reconnect pending: a refused attempt, an exhausted budget or
    /// an explicit disconnect.
    pub async fn reconnected(&self) -> Result<(), RpcError> {
        let mut state = self.state_rx.clone();
        let mut cycle = self.cycle_rx.clone();
        loop {
            let current = *state.borrow_and_update();
            let cycling = *cycle.borrow_and_update();
            match current {
                ConnectionState::Open => return Ok(()),
                ConnectionState::Closed if !cycling => return Err(RpcError::ConnectionNotOpen),
                _ => {}
            }
            tokio::select! {
                changed = state.changed() => changed.map_err(|_| RpcError::ConnectionNotOpen)?,
                changed = cycle.changed() => changed.map_err(|_| RpcError::ConnectionNotOpen)?,
            }
        }
    }

    /// Reconnect notifications and every decoded push event.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Calls accepted but not yet resolved (queued plus in-flight).
    pub fn pending_calls(&self) -> usize {
        self.store.queued_len() + self.store.in_flight_len()
    }

    /// Active subscriptions on the current socket.
    pub fn subscription_count(&self) -> usize {
        self.store.subscription_len()
    }

    /// Open the socket, or join the attempt already under way. Resolves once
    /// the socket is open or the attempt failed.
    pub async fn connect(&self) -> Result<(), RpcError> {
        let (done, rx) = oneshot::channel();
        self.command(Command::Connect { done: Some(done) });
        rx.await.unwrap_or(Err(RpcError::ConnectionNotOpen))
    }

    /// Close the socket with `code` and stay closed until the next
    /// [`connect`](Self::connect).
    pub async fn disconnect(&self, code: u16) {
        let (done, rx) = oneshot::channel();
        self.command(Command::Disconnect { code, done });
        let _ = rx.await;
    }

    /// Drop the current socket and let the reconnect path open a fresh one.
    pub fn refresh(&self) {
        self.command(Command::Refresh);
    }

    /// Submit a call; the returned receiver resolves exactly once with the
    /// raw reply envelope or the reason the call failed.
    pub fn submit(&self, method: impl Into<String>, params: impl Serialize) -> ReplyReceiver {
        self.submit_with(method.into(), params, None)
    }

    /// Call `method` and decode the reply as one `T` or a batch of `T`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: impl Into<String>,
        params: impl Serialize,
    ) -> Result<Reply<T>, RpcError> {
        let raw = wait(self.submit(method, params)).await?;
        decode_reply(&raw)
    }

    /// Call `method` and decode the reply as a single `T`.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: impl Into<String>,
        params: impl Serialize,
    ) -> Result<T, RpcError> {
        self.request(method, params).await?.into_single()
    }

    /// Subscribe to a push stream.
    ///
    /// The receiver yields decoded events until the subscription is removed
    /// or the socket closes, after which it returns `None`.
    pub async fn subscribe(
        &self,
        kind: SubscriptionKind,
    ) -> Result<(SubscriptionId, mpsc::UnboundedReceiver<SubscriptionEvent>), RpcError> {
        let (listener, rx) = SubscriptionListener::new(kind);
        let reply = self.submit_with("eth_subscribe".into(), [kind.as_str()], Some(listener));
        let raw = wait(reply).await?;
        let id: String = decode_reply(&raw)?.into_single()?;
        Ok((SubscriptionId(id), rx))
    }

    /// Stop delivering events for `id` and tell the node. Returns the node's
    /// answer to `eth_unsubscribe`.
    pub async fn unsubscribe(&self, id: &SubscriptionId) -> Result<bool, RpcError> {
        let (completion, rx) = oneshot::channel();
        self.command(Command::Unsubscribe {
            id: id.clone(),
            completion,
        });
        let raw = wait(rx).await?;
        decode_reply(&raw)?.into_single()
    }

    fn submit_with(
        &self,
        method: String,
        params: impl Serialize,
        listener: Option<SubscriptionListener>,
    ) -> ReplyReceiver {
        let (completion, rx) = oneshot::channel();
        match serde_json::to_value(params) {
            Ok(params) => self.command(Command::Submit {
                method,
                params,
                completion,
                listener,
            }),
            Err(e) => {
                let _ = completion.send(Err(RpcError::EncodeIssue(e.to_string())));
            }
        }
        rx
    }

    fn command(&self, cmd: Command) {
        if self.cmd_tx.send(cmd).is_err() {
            // The command, and any completion it carried, is dropped here;
            // waiters observe a closed channel.
            tracing::debug!(url = %self.url, "client task stopped, dropping command");
        }
    }
}

impl std::fmt::Debug for WsRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsRpcClient")
            .field("url", &self.url)
            .field("state", &self.state())
            .finish()
    }
}

async fn wait(rx: ReplyReceiver) -> Result<RawResponse, RpcError> {
    rx.await
        .unwrap_or(Err(RpcError::Transport(TransportError::Closed)))
}

/// Params for a method that takes none.
pub fn no_params() -> Value {
    Value::Array(vec![])
}
