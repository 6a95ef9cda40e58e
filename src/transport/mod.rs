//! The transport seam.
//!
//! A [`Connector`] opens one [`Connection`] per attempt. A connection is a pair of channels:
//! outbound [`Frame`]s flow to whatever I/O task drives the real socket, and
//! [`TransportEvent`]s flow back. [`Connection::pair`] hands out both ends, so a connector only
//! has to spawn a task that owns the [`Endpoint`].

#[cfg(feature = "tungstenite")]
pub mod tungstenite;

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use crate::Result;
use crate::error::Error;

/// Close code for a normal, caller-requested closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported when a connection went away without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// A message body, passed through to and from the transport unchanged.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    /// The payload as text, if it was sent or received as text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Self::Binary(bytes.to_vec())
    }
}

/// Instructions from a [`Connection`] to the I/O side.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Transmit a payload
    Payload(Payload),
    /// Send a liveness probe
    Ping,
    /// Close the socket with the given code
    Close(u16),
}

/// What the I/O side reports back to a [`Connection`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A payload arrived from the peer
    Message(Payload),
    /// The peer answered a liveness probe
    Pong,
    /// The transport failed; the connection should be considered dead
    Error(String),
    /// The peer (or the transport) closed the connection
    Closed {
        /// WebSocket close code
        code: u16,
    },
}

/// Opens connections to a resolved target.
///
/// Returning `Ok` is the "open" signal; errors are reported as a failed attempt.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, target: &Url) -> Result<Connection>;
}

/// The controller's side of one live connection.
#[derive(Debug)]
pub struct Connection {
    frames: mpsc::UnboundedSender<Frame>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Connection {
    /// Create a connection together with the [`Endpoint`] an I/O task drives.
    #[must_use]
    pub fn pair() -> (Connection, Endpoint) {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        (
            Connection {
                frames: frames_tx,
                events: events_rx,
            },
            Endpoint {
                frames: frames_rx,
                events: events_tx,
            },
        )
    }

    /// Hand a payload to the transport. Exactly one transmission attempt is made.
    pub fn send(&self, payload: Payload) -> Result<()> {
        self.frames
            .send(Frame::Payload(payload))
            .map_err(|_e| Error::closed())
    }

    /// Send a liveness probe.
    pub fn ping(&self) -> Result<()> {
        self.frames.send(Frame::Ping).map_err(|_e| Error::closed())
    }

    /// Close the connection and stop listening for its events.
    ///
    /// Fails if the I/O side is already gone, which is expected when tearing down a connection
    /// that never fully opened.
    pub fn close(self, code: u16) -> Result<()> {
        let Self { frames, events } = self;
        drop(events);
        frames.send(Frame::Close(code)).map_err(|_e| Error::closed())
    }

    /// Next event from the transport. `None` once the I/O side has dropped its endpoint.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }
}

/// The I/O side of a [`Connection`].
#[derive(Debug)]
pub struct Endpoint {
    frames: mpsc::UnboundedReceiver<Frame>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl Endpoint {
    /// Next frame the controller wants written. `None` once the connection was dropped.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.frames.recv().await
    }

    /// Frame already queued, if any.
    pub fn try_next_frame(&mut self) -> Option<Frame> {
        self.frames.try_recv().ok()
    }

    /// Report an event. Returns `false` if the controller no longer listens.
    pub fn report(&self, event: TransportEvent) -> bool {
        self.events.send(event).is_ok()
    }

    pub fn message<P: Into<Payload>>(&self, payload: P) -> bool {
        self.report(TransportEvent::Message(payload.into()))
    }

    pub fn pong(&self) -> bool {
        self.report(TransportEvent::Pong)
    }

    pub fn error<S: Into<String>>(&self, reason: S) -> bool {
        self.report(TransportEvent::Error(reason.into()))
    }

    pub fn closed(&self, code: u16) -> bool {
        self.report(TransportEvent::Closed { code })
    }

    /// Whether the controller has let go of this connection.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.events.is_closed()
    }

    #[cfg(feature = "tungstenite")]
    pub(crate) fn into_parts(
        self,
    ) -> (
        mpsc::UnboundedReceiver<Frame>,
        mpsc::UnboundedSender<TransportEvent>,
    ) {
        (self.frames, self.events)
    }
}
