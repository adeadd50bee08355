//! `tokio-tungstenite` implementation of the transport boundary.

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{future, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};

use chainsocket_core::error::TransportError;
use chainsocket_core::transport::{FrameSink, Session, Transport, TransportConfig, TransportEvent};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// WebSocket transport. `ws://` and `wss://` URLs are both accepted; TLS
/// uses webpki roots unless a connector is supplied.
#[derive(Clone, Default)]
pub struct WsTransport {
    tls: Option<Connector>,
}

impl WsTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom TLS connector (client certificates, private roots, ...).
    pub fn with_tls(connector: Connector) -> Self {
        Self { tls: Some(connector) }
    }
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport")
            .field("custom_tls", &self.tls.is_some())
            .finish()
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, url: &str, config: &TransportConfig) -> Result<Session, TransportError> {
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_frame_size = Some(config.max_frame_size);
        ws_config.max_message_size = Some(config.max_frame_size);

        let attempt = connect_async_tls_with_config(url, Some(ws_config), false, self.tls.clone());
        let (ws_stream, _) = match tokio::time::timeout(config.connect_timeout, attempt).await {
            Err(_) => {
                return Err(TransportError::ConnectTimeout {
                    ms: config.connect_timeout.as_millis() as u64,
                })
            }
            Ok(Err(e)) => return Err(TransportError::Connect(e.to_string())),
            Ok(Ok(conn)) => conn,
        };

        let (sink, stream) = ws_stream.split();
        let frames = stream.filter_map(|msg| future::ready(classify(msg)));

        Ok(Session {
            sink: Box::new(WsFrameSink { inner: sink }),
            frames: Box::pin(frames),
        })
    }
}

fn classify(msg: Result<Message, tokio_tungstenite::tungstenite::Error>) -> Option<TransportEvent> {
    match msg {
        Ok(Message::Text(text)) => Some(TransportEvent::Frame(text.to_string())),
        // Some nodes push JSON in binary frames.
        Ok(Message::Binary(bytes)) => String::from_utf8(bytes.to_vec())
            .ok()
            .map(TransportEvent::Frame),
        Ok(Message::Close(frame)) => Some(TransportEvent::Closed(frame.map(|f| u16::from(f.code)))),
        Ok(_) => None, // ping / pong / raw frames
        Err(e) => {
            tracing::warn!(error = %e, "WS receive error");
            Some(TransportEvent::Closed(None))
        }
    }
}

struct WsFrameSink {
    inner: WsSink,
}

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.inner
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self, code: u16) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: "".into(),
        };
        self.inner
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}
