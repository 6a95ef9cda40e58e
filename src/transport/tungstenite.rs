//! [`Connector`] backed by `tokio-tungstenite`.

use async_trait::async_trait;
use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::{ABNORMAL_CLOSURE, Connection, Connector, Endpoint, Frame, Payload, TransportEvent};
use crate::Result;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code reported when the peer sent a close frame without a status.
const NO_STATUS_RECEIVED: u16 = 1005;

/// How liveness probes look on the wire.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HeartbeatStyle {
    /// WebSocket Ping control frames, answered by Pong control frames
    #[default]
    Control,
    /// Application-level text probes, for servers that expect e.g. `"PING"` and reply `"PONG"`
    Text {
        /// Text sent as a probe
        ping: String,
        /// Text that counts as a reply. It is never delivered as a message.
        pong: String,
    },
}

impl HeartbeatStyle {
    #[must_use]
    pub fn text<S: Into<String>>(ping: S, pong: S) -> Self {
        Self::Text {
            ping: ping.into(),
            pong: pong.into(),
        }
    }

    fn probe(&self) -> Message {
        match self {
            Self::Control => Message::Ping(Vec::new().into()),
            Self::Text { ping, .. } => Message::Text(ping.as_str().into()),
        }
    }

    fn is_reply(&self, text: &str) -> bool {
        matches!(self, Self::Text { pong, .. } if pong == text)
    }
}

/// Opens one `ws://` or `wss://` connection per attempt.
///
/// Each connection gets its own I/O task, which lives until either side closes.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    heartbeat: HeartbeatStyle,
}

impl WebSocketConnector {
    #[must_use]
    pub fn new(heartbeat: HeartbeatStyle) -> Self {
        Self { heartbeat }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, target: &Url) -> Result<Connection> {
        let (stream, _) = connect_async(target.as_str()).await?;

        #[cfg(feature = "tracing")]
        tracing::debug!(%target, "WebSocket handshake complete");

        let (connection, endpoint) = Connection::pair();
        let heartbeat = self.heartbeat.clone();
        tokio::spawn(async move {
            pump(stream, endpoint, heartbeat).await;
        });

        Ok(connection)
    }
}

/// Move frames to the socket and socket messages back, until one side goes away.
async fn pump(stream: WsStream, endpoint: Endpoint, heartbeat: HeartbeatStyle) {
    let (mut write, mut read) = stream.split();
    let (mut frames, events) = endpoint.into_parts();

    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else {
                    // Connection dropped without closing
                    _ = write.send(Message::Close(None)).await;
                    break;
                };

                let closing = matches!(frame, Frame::Close(_));
                if let Err(e) = write.send(outgoing(frame, &heartbeat)).await {
                    if !closing {
                        report(&events, TransportEvent::Error(e.to_string()));
                    }
                    break;
                }
                if closing {
                    break;
                }
            }

            message = read.next() => {
                let event = match message {
                    Some(Ok(message)) => match incoming(message, &heartbeat) {
                        Some(event) => event,
                        None => continue,
                    },
                    Some(Err(e)) => TransportEvent::Error(e.to_string()),
                    None => TransportEvent::Closed { code: ABNORMAL_CLOSURE },
                };

                let finished = matches!(
                    event,
                    TransportEvent::Error(_) | TransportEvent::Closed { .. }
                );
                report(&events, event);
                if finished {
                    break;
                }
            }
        }
    }

    #[cfg(feature = "tracing")]
    tracing::debug!("WebSocket I/O task finished");
}

fn report(events: &mpsc::UnboundedSender<TransportEvent>, event: TransportEvent) {
    #[cfg(feature = "tracing")]
    tracing::trace!(?event, "Transport event");

    // Nobody listening means the connection is being torn down already
    _ = events.send(event);
}

fn outgoing(frame: Frame, heartbeat: &HeartbeatStyle) -> Message {
    match frame {
        Frame::Payload(Payload::Text(text)) => Message::Text(text.into()),
        Frame::Payload(Payload::Binary(bytes)) => Message::Binary(bytes.into()),
        Frame::Ping => heartbeat.probe(),
        Frame::Close(code) => Message::Close(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: "".into(),
        })),
    }
}

/// Translate a socket message. `None` for traffic the controller does not care about.
fn incoming(message: Message, heartbeat: &HeartbeatStyle) -> Option<TransportEvent> {
    match message {
        Message::Text(text) if heartbeat.is_reply(text.as_str()) => Some(TransportEvent::Pong),
        Message::Text(text) => Some(TransportEvent::Message(Payload::Text(
            text.as_str().to_owned(),
        ))),
        Message::Binary(bytes) => Some(TransportEvent::Message(Payload::Binary(bytes.to_vec()))),
        Message::Pong(_) => Some(TransportEvent::Pong),
        Message::Close(frame) => Some(TransportEvent::Closed {
            code: frame.map_or(NO_STATUS_RECEIVED, |frame| u16::from(frame.code)),
        }),
        // Pings are answered by tungstenite itself
        Message::Ping(_) | Message::Frame(_) => None,
    }
}
