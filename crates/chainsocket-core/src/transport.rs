//! The transport boundary: what the client needs from a socket.
//!
//! A [`Transport`] opens a [`Session`]: a writable [`FrameSink`] plus a
//! [`FrameStream`] of inbound frames and close notifications. The client
//! owns the session and pulls from its stream; the transport never holds a
//! reference back to the client.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;

use crate::error::TransportError;

/// Something that happened on an open session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame arrived.
    Frame(String),
    /// The socket closed, with the close code if one was received.
    Closed(Option<u16>),
}

/// Inbound side of a session. Ending without a [`TransportEvent::Closed`]
/// counts as a close with no code.
pub type FrameStream = Pin<Box<dyn Stream<Item = TransportEvent> + Send>>;

/// Outbound side of a session.
#[async_trait]
pub trait FrameSink: Send {
    /// Write one text frame.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Start a close handshake with `code`.
    async fn close(&mut self, code: u16) -> Result<(), TransportError>;
}

/// One established socket.
pub struct Session {
    pub sink: Box<dyn FrameSink>,
    pub frames: FrameStream,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

/// Socket-level options passed on every connect.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Largest accepted frame, in bytes.
    pub max_frame_size: usize,
    /// Give up on a connect attempt after this long.
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_frame_size: 16 << 20,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Opens sessions to a URL.
///
/// # Thread Safety
/// Implementations must be `Send + Sync`; connects run on spawned tasks.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self, url: &str, config: &TransportConfig) -> Result<Session, TransportError>;
}
