#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests, and https://github.com/rust-lang/rust-clippy/issues/13981"
)]
#![allow(
    unused,
    reason = "Not every test binary uses every helper"
)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use resilient_ws::error::Error;
use resilient_ws::{
    Connection, Connector, Endpoint, Event, EventKind, Frame, Payload, ReconnectingSocket,
    Settings,
};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};
use url::Url;

pub const TARGET: &str = "ws://mock.test/feed";

/// Generous upper bound for anything a test waits on. Time is paused in most tests, so this
/// never slows them down.
pub const WAIT: Duration = Duration::from_secs(300);

/// Settings with small, round numbers that are easy to reason about in assertions.
#[must_use]
pub fn settings() -> Settings {
    Settings::builder()
        .connection_timeout(Duration::from_secs(2))
        .heartbeat_interval(Duration::from_secs(1))
        .heartbeat_timeout(Duration::from_secs(3))
        .min_reconnect_delay(Duration::from_millis(100))
        .max_reconnect_delay(Duration::from_secs(1))
        .reconnect_delay_multiplier(2.0)
        .build()
}

/// How the mock handles one connection attempt.
#[derive(Debug, Clone)]
pub enum Outcome {
    Accept,
    Fail(&'static str),
    /// Never finish, leaving it to the connection timeout
    Hang,
}

#[derive(Default)]
struct Shared {
    script: Mutex<VecDeque<Outcome>>,
    attempts: Mutex<Vec<(Instant, Url)>>,
}

/// In-process [`Connector`]. Attempts follow the scripted outcomes, then accept.
pub struct MockConnector {
    shared: Arc<Shared>,
    accepted: mpsc::UnboundedSender<Endpoint>,
}

/// The test's side of a [`MockConnector`].
pub struct MockServer {
    shared: Arc<Shared>,
    accepted: mpsc::UnboundedReceiver<Endpoint>,
}

impl MockConnector {
    #[must_use]
    pub fn new() -> (Self, MockServer) {
        Self::scripted([])
    }

    #[must_use]
    pub fn scripted<I: IntoIterator<Item = Outcome>>(outcomes: I) -> (Self, MockServer) {
        let shared = Arc::new(Shared::default());
        shared.script.lock().unwrap().extend(outcomes);
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();

        (
            Self {
                shared: Arc::clone(&shared),
                accepted: accepted_tx,
            },
            MockServer {
                shared,
                accepted: accepted_rx,
            },
        )
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, target: &Url) -> resilient_ws::Result<Connection> {
        self.shared
            .attempts
            .lock()
            .unwrap()
            .push((Instant::now(), target.clone()));

        let outcome = self
            .shared
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Outcome::Accept);

        match outcome {
            Outcome::Accept => {
                let (connection, endpoint) = Connection::pair();
                self.accepted.send(endpoint).unwrap();
                Ok(connection)
            }
            Outcome::Fail(reason) => Err(Error::resolution(reason)),
            Outcome::Hang => std::future::pending().await,
        }
    }
}

impl MockServer {
    /// Wait for the next accepted connection.
    pub async fn accept(&mut self) -> Peer {
        let endpoint = timeout(WAIT, self.accepted.recv())
            .await
            .expect("no connection was accepted in time")
            .unwrap();
        Peer { endpoint }
    }

    /// Times and URLs of every attempt so far, accepted or not.
    #[must_use]
    pub fn attempts(&self) -> Vec<(Instant, Url)> {
        self.shared.attempts.lock().unwrap().clone()
    }

    #[must_use]
    pub fn attempt_count(&self) -> usize {
        self.shared.attempts.lock().unwrap().len()
    }
}

/// The server end of one accepted connection.
pub struct Peer {
    endpoint: Endpoint,
}

impl Peer {
    pub async fn next_frame(&mut self) -> Frame {
        timeout(WAIT, self.endpoint.next_frame())
            .await
            .expect("no frame arrived in time")
            .expect("connection was dropped")
    }

    /// Next payload, skipping (and answering) heartbeat probes.
    pub async fn next_payload(&mut self) -> Payload {
        loop {
            match self.next_frame().await {
                Frame::Payload(payload) => return payload,
                Frame::Ping => {
                    self.endpoint.pong();
                }
                other => panic!("expected a payload, got {other:?}"),
            }
        }
    }

    /// Wait for the controller to close this connection, returning the code.
    pub async fn closed_with(&mut self) -> u16 {
        loop {
            match self.next_frame().await {
                Frame::Close(code) => return code,
                Frame::Ping | Frame::Payload(_) => {}
                other => panic!("unexpected frame {other:?}"),
            }
        }
    }

    /// Frames already queued, without waiting.
    pub fn pending_frames(&mut self) -> Vec<Frame> {
        std::iter::from_fn(|| self.endpoint.try_next_frame()).collect()
    }

    pub fn send(&self, payload: &str) {
        assert!(self.endpoint.message(payload), "controller is listening");
    }

    /// Close from the server side.
    pub fn close(&self, code: u16) {
        assert!(self.endpoint.closed(code), "controller is listening");
    }

    pub fn fail(&self, reason: &str) {
        assert!(self.endpoint.error(reason), "controller is listening");
    }

    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.endpoint.is_detached()
    }

    /// Answer every probe from now on, counting them.
    pub fn answer_heartbeats(self) -> (Arc<AtomicUsize>, JoinHandle<Self>) {
        let probes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&probes);

        let handle = tokio::spawn(async move {
            let mut peer = self;
            while let Some(frame) = peer.endpoint.next_frame().await {
                match frame {
                    Frame::Ping => {
                        counter.fetch_add(1, Ordering::SeqCst);
                        peer.endpoint.pong();
                    }
                    Frame::Close(_) => break,
                    _ => {}
                }
            }
            peer
        });

        (probes, handle)
    }
}

/// Wait for the next event of `kind`, skipping any others.
pub async fn next_event(events: &mut broadcast::Receiver<Event>, kind: EventKind) -> Event {
    timeout(WAIT, async {
        loop {
            let event = events.recv().await.unwrap();
            if event.kind() == kind {
                return event;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {kind} event arrived in time"))
}

/// Connect to [`TARGET`] through `connector`, subscribing before the driver gets to run.
pub fn connect(
    connector: MockConnector,
    settings: Settings,
) -> (ReconnectingSocket, broadcast::Receiver<Event>) {
    let socket = ReconnectingSocket::connect(TARGET, settings, connector).unwrap();
    let events = socket.subscribe();
    (socket, events)
}
