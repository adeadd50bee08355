//! Connection state machine.
//!
//! One background task owns the socket, the connection state, the reconnect
//! timer and every mutation of the call tables. Callers reach it only
//! through [`Command`]s, so submissions and state transitions are naturally
//! serialised and need no lock ordering.
//!
//! ```text
//!            connect()                 open
//!   Closed ───────────▶ Connecting ───────────▶ Open
//!     ▲                   │   ▲                  │
//!     │   connect failed  │   │ reconnect timer  │ socket closed
//!     └───────────────────┘   └──────────────────┘ (unless disconnect())
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use chainsocket_core::codec::Codec;
use chainsocket_core::error::{RpcError, TransportError};
use chainsocket_core::events::{ClientEvent, SubscriptionId};
use chainsocket_core::policy::ReconnectPolicy;
use chainsocket_core::store::{Completion, StateStore, SubscriptionListener};
use chainsocket_core::transport::{
    FrameSink, FrameStream, Session, Transport, TransportConfig, TransportEvent,
};

use crate::correlator::{CallRequest, Correlator, Dispatch};
use crate::subscriptions::SubscriptionDemux;

/// Close code sent on a caller-initiated disconnect or shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Where the socket is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// Requests from client handles.
pub(crate) enum Command {
    Submit {
        method: String,
        params: Value,
        completion: Completion,
        listener: Option<SubscriptionListener>,
    },
    Unsubscribe {
        id: SubscriptionId,
        completion: Completion,
    },
    Connect {
        done: Option<oneshot::Sender<Result<(), RpcError>>>,
    },
    Disconnect {
        code: u16,
        done: oneshot::Sender<()>,
    },
    Refresh,
}

/// Results from tasks the machine spawned itself. Each carries the epoch it
/// was started under; anything from an older epoch is stale.
enum Internal {
    Connected {
        epoch: u64,
        result: Result<Session, TransportError>,
    },
    ReconnectDue {
        epoch: u64,
    },
}

/// Everything the machine needs besides its command channel.
pub(crate) struct MachineParts {
    pub url: String,
    pub transport: Arc<dyn Transport>,
    pub transport_config: TransportConfig,
    pub policy: ReconnectPolicy,
    pub codec: Arc<dyn Codec>,
    pub store: Arc<StateStore>,
    pub state_tx: watch::Sender<ConnectionState>,
    pub cycle_tx: watch::Sender<bool>,
    pub events: broadcast::Sender<ClientEvent>,
}

pub(crate) struct ConnectionMachine {
    url: String,
    transport: Arc<dyn Transport>,
    transport_config: TransportConfig,
    policy: ReconnectPolicy,
    codec: Arc<dyn Codec>,
    store: Arc<StateStore>,
    correlator: Correlator,
    demux: SubscriptionDemux,
    events: broadcast::Sender<ClientEvent>,

    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    /// `true` while a reconnect cycle is underway (timer pending or a
    /// reconnect attempt running).
    cycle_tx: watch::Sender<bool>,
    sink: Option<Box<dyn FrameSink>>,
    frames: Option<FrameStream>,

    attempts: u32,
    forced_close: bool,
    reconnecting: bool,
    epoch: u64,
    connecting: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
    connect_waiters: Vec<oneshot::Sender<Result<(), RpcError>>>,

    commands: mpsc::UnboundedReceiver<Command>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
}

impl ConnectionMachine {
    pub fn new(parts: MachineParts, commands: mpsc::UnboundedReceiver<Command>) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let correlator = Correlator::new(Arc::clone(&parts.store), Arc::clone(&parts.codec));
        let demux = SubscriptionDemux::new(Arc::clone(&parts.store), parts.events.clone());
        Self {
            url: parts.url,
            transport: parts.transport,
            transport_config: parts.transport_config,
            policy: parts.policy,
            codec: parts.codec,
            store: parts.store,
            correlator,
            demux,
            events: parts.events,
            state: ConnectionState::Closed,
            state_tx: parts.state_tx,
            cycle_tx: parts.cycle_tx,
            sink: None,
            frames: None,
            attempts: 0,
            forced_close: false,
            reconnecting: false,
            epoch: 0,
            connecting: None,
            reconnect_timer: None,
            connect_waiters: Vec::new(),
            commands,
            internal_tx,
            internal_rx,
        }
    }

    /// Drive the machine until every client handle is gone.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd).await,
                    None => break,
                },
                Some(msg) = self.internal_rx.recv() => self.on_internal(msg).await,
                event = next_event(&mut self.frames) => self.on_transport(event).await,
            }
        }
        self.shutdown().await;
    }

    async fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Submit {
                method,
                params,
                completion,
                listener,
            } => {
                self.submit(CallRequest {
                    method,
                    params,
                    completion,
                    listener,
                })
                .await
            }
            Command::Unsubscribe { id, completion } => {
                self.demux.unsubscribe(&id);
                self.submit(CallRequest {
                    method: "eth_unsubscribe".into(),
                    params: Value::Array(vec![Value::String(id.0)]),
                    completion,
                    listener: None,
                })
                .await
            }
            Command::Connect { done } => self.connect(done),
            Command::Disconnect { code, done } => {
                self.disconnect(code).await;
                let _ = done.send(());
            }
            Command::Refresh => self.refresh().await,
        }
    }

    async fn on_internal(&mut self, msg: Internal) {
        match msg {
            Internal::Connected { epoch, result } => {
                if epoch != self.epoch {
                    if let Ok(mut session) = result {
                        tracing::debug!(url = %self.url, "closing session from a superseded connect");
                        tokio::spawn(async move {
                            let _ = session.sink.close(NORMAL_CLOSURE).await;
                        });
                    }
                    return;
                }
                self.connecting = None;
                match result {
                    Ok(session) => self.on_open(session).await,
                    Err(e) => self.on_connect_failed(e),
                }
            }
            Internal::ReconnectDue { epoch } => {
                if epoch != self.epoch || self.state == ConnectionState::Open {
                    return;
                }
                self.reconnect_timer = None;
                self.attempts = self.attempts.saturating_add(1);
                self.start_connect(true);
            }
        }
    }

    async fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Frame(text) => self.route_frame(&text),
            TransportEvent::Closed(code) => self.on_socket_closed(code),
        }
    }

    // ─── Correlation ─────────────────────────────────────────────────────────

    async fn submit(&mut self, req: CallRequest) {
        if let Dispatch::Send { id, payload } = self.correlator.submit(req, self.state) {
            self.write(id, payload).await;
        }
    }

    async fn write(&mut self, id: u64, payload: String) {
        let result = match self.sink.as_mut() {
            Some(sink) => sink.send(payload).await,
            None => Err(TransportError::Closed),
        };
        if let Err(e) = result {
            tracing::warn!(id, error = %e, "failed to send call");
            self.correlator.fail_in_flight(id, RpcError::Transport(e));
        }
    }

    fn route_frame(&self, text: &str) {
        let Some(envelope) = self.codec.decode_envelope(text) else {
            tracing::debug!(len = text.len(), "dropping unrecognised frame");
            return;
        };
        if envelope.id.is_some() {
            self.correlator.resolve(&envelope, &self.demux);
        }
        if envelope.subscription.is_some() {
            self.demux.dispatch(&envelope);
        }
    }

    // ─── Transitions ─────────────────────────────────────────────────────────

    fn connect(&mut self, done: Option<oneshot::Sender<Result<(), RpcError>>>) {
        match self.state {
            ConnectionState::Open => {
                if let Some(done) = done {
                    let _ = done.send(Ok(()));
                }
            }
            ConnectionState::Connecting if self.connecting.is_some() => {
                self.connect_waiters.extend(done);
            }
            _ => {
                self.connect_waiters.extend(done);
                self.forced_close = false;
                let reconnect = self.reconnect_timer.is_some();
                self.start_connect(reconnect);
            }
        }
    }

    fn start_connect(&mut self, reconnect: bool) {
        self.cancel_pending();
        let epoch = self.epoch;
        self.reconnecting = reconnect;
        self.set_state(ConnectionState::Connecting);
        tracing::info!(url = %self.url, reconnect, attempt = self.attempts, "connecting via WebSocket");

        let transport = Arc::clone(&self.transport);
        let url = self.url.clone();
        let config = self.transport_config.clone();
        let tx = self.internal_tx.clone();
        self.connecting = Some(tokio::spawn(async move {
            let result = transport.connect(&url, &config).await;
            let _ = tx.send(Internal::Connected { epoch, result });
        }));
    }

    async fn on_open(&mut self, session: Session) {
        self.sink = Some(session.sink);
        self.frames = Some(session.frames);
        self.set_state(ConnectionState::Open);
        self.set_cycle(false);
        self.attempts = 0;
        tracing::info!(url = %self.url, "WS connected");

        if std::mem::take(&mut self.reconnecting) {
            tracing::info!(url = %self.url, "WS reconnected");
            let _ = self.events.send(ClientEvent::Reconnected);
        }
        self.resolve_waiters(Ok(()));

        let queued = self.store.drain_queued();
        if !queued.is_empty() {
            tracing::debug!(count = queued.len(), "flushing queued calls");
        }
        for call in queued {
            let (id, payload) = self.correlator.register_in_flight(call);
            self.write(id, payload).await;
        }
    }

    fn on_connect_failed(&mut self, e: TransportError) {
        tracing::warn!(url = %self.url, error = %e, "WS connect failed");
        let retry = e.is_connect_timeout();
        if retry {
            self.set_cycle(true);
        } else {
            // The client goes idle; the next manual connect starts a fresh budget.
            self.attempts = 0;
            self.reconnecting = false;
            self.set_cycle(false);
        }
        self.set_state(ConnectionState::Closed);
        self.fail_in_flight(RpcError::ConnectionNotOpen);
        self.fail_queued(RpcError::ConnectionNotOpen);
        self.demux.clear();
        self.resolve_waiters(Err(RpcError::Transport(e.clone())));
        if retry {
            self.reconnect();
        }
    }

    fn on_socket_closed(&mut self, code: Option<u16>) {
        tracing::warn!(url = %self.url, code = ?code, forced = self.forced_close, "WS disconnected");
        self.sink = None;
        self.frames = None;
        // Publish the new state before listeners see their streams end.
        if self.forced_close {
            self.set_state(ConnectionState::Closed);
        } else {
            self.set_cycle(true);
            self.set_state(ConnectionState::Connecting);
        }
        self.fail_in_flight(RpcError::InvalidConnection);
        self.fail_queued(RpcError::ConnectionNotOpen);
        let released = self.demux.clear();
        if released > 0 {
            tracing::debug!(count = released, "released subscriptions");
        }

        if self.forced_close {
            self.resolve_waiters(Err(RpcError::ConnectionNotOpen));
            return;
        }
        self.reconnect();
    }

    fn reconnect(&mut self) {
        self.fail_in_flight(RpcError::PendingRequestsOnReconnecting);

        if !self.policy.should_attempt(self.attempts) {
            tracing::warn!(url = %self.url, attempts = self.attempts, "max reconnect attempts reached");
            self.fail_queued(RpcError::MaxAttemptsReachedOnReconnecting);
            self.attempts = 0;
            self.reconnecting = false;
            self.set_cycle(false);
            self.set_state(ConnectionState::Closed);
            self.resolve_waiters(Err(RpcError::MaxAttemptsReachedOnReconnecting));
            return;
        }

        let delay = self.policy.delay(self.attempts);
        tracing::warn!(url = %self.url, attempt = self.attempts, "reconnecting in {delay:?}");
        self.schedule_reconnect(delay);
    }

    fn schedule_reconnect(&mut self, delay: Duration) {
        self.cancel_pending();
        let epoch = self.epoch;
        let tx = self.internal_tx.clone();
        self.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Internal::ReconnectDue { epoch });
        }));
    }

    async fn disconnect(&mut self, code: u16) {
        tracing::info!(url = %self.url, code, "disconnect requested");
        self.forced_close = true;
        self.cancel_pending();
        self.attempts = 0;
        self.reconnecting = false;
        self.set_cycle(false);
        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.close(code).await {
                tracing::debug!(error = %e, "close handshake failed");
            }
        }
        self.on_socket_closed(Some(code));
    }

    async fn refresh(&mut self) {
        let Some(sink) = self.sink.as_mut() else {
            tracing::debug!(url = %self.url, "refresh ignored, no open socket");
            return;
        };
        tracing::info!(url = %self.url, "refreshing connection");
        if let Err(e) = sink.close(NORMAL_CLOSURE).await {
            tracing::debug!(error = %e, "close handshake failed");
        }
        self.on_socket_closed(None);
    }

    async fn shutdown(&mut self) {
        tracing::debug!(url = %self.url, "client dropped, shutting down");
        self.disconnect(NORMAL_CLOSURE).await;
    }

    // ─── Helpers ─────────────────────────────────────────────────────────────

    /// Abort any connect attempt or reconnect timer and start a new epoch so
    /// their late results are ignored.
    fn cancel_pending(&mut self) {
        if let Some(task) = self.connecting.take() {
            task.abort();
        }
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        self.epoch = self.epoch.wrapping_add(1);
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            tracing::debug!(from = %self.state, to = %state, "connection state");
        }
        self.state = state;
        self.state_tx.send_replace(state);
    }

    fn set_cycle(&self, active: bool) {
        self.cycle_tx.send_if_modified(|current| std::mem::replace(current, active) != active);
    }

    fn fail_in_flight(&self, err: RpcError) {
        for call in self.store.drain_in_flight() {
            call.fail(err.clone());
        }
    }

    fn fail_queued(&self, err: RpcError) {
        for call in self.store.drain_queued() {
            call.fail(err.clone());
        }
    }

    fn resolve_waiters(&mut self, result: Result<(), RpcError>) {
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }
}

/// The next event on the open session; pending forever while there is none.
async fn next_event(frames: &mut Option<FrameStream>) -> TransportEvent {
    match frames {
        Some(stream) => stream.next().await.unwrap_or(TransportEvent::Closed(None)),
        None => std::future::pending().await,
    }
}
