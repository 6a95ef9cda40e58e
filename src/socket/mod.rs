//! The self-healing socket.
//!
//! [`ReconnectingSocket`] is a cheap, cloneable handle. All state lives in a driver task that
//! is spawned on construction and runs until [`ReconnectingSocket::close`] is called or every
//! handle has been dropped.

mod buffer;
mod driver;
mod machine;
mod timer;

use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};

use async_stream::try_stream;
use futures::Stream;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use self::driver::{Command, Driver};
pub use self::machine::ConnectionState;
use crate::Result;
use crate::config::Settings;
use crate::error::Lagged;
use crate::event::{BROADCAST_CAPACITY, Emitter, Event, EventKind, ListenerId, Listeners};
use crate::target::Target;
use crate::transport::{Connector, NORMAL_CLOSURE, Payload};

/// Close code used when the caller does not pick one.
pub const DEFAULT_CLOSE_CODE: u16 = NORMAL_CLOSURE;

/// A WebSocket client that keeps itself connected.
///
/// It connects as soon as it is created, probes the peer every `heartbeat_interval`, and on any
/// failure tears the connection down and tries again after an exponentially growing delay.
/// Messages sent while disconnected are buffered (if enabled) and flushed on the next open.
///
/// Events are delivered to listeners registered with [`on`](Self::on)/[`once`](Self::once),
/// and to every [`subscribe`](Self::subscribe)r. The driver starts working immediately, so
/// register listeners right after construction, before yielding to the runtime, to be sure
/// to see the first [`Event::Open`].
///
/// Dropping the last handle closes the socket with [`DEFAULT_CLOSE_CODE`]. A listener that
/// captures a clone of the socket keeps it alive forever; capture a [`WeakSocket`] from
/// [`downgrade`](Self::downgrade) instead.
///
/// # Example
///
/// ```rust, no_run
/// use resilient_ws::{Event, EventKind, ReconnectingSocket, Settings};
///
/// #[tokio::main]
/// async fn main() -> resilient_ws::Result<()> {
///     let socket = ReconnectingSocket::websocket("wss://echo.example.com", Settings::default())?;
///
///     socket.on(EventKind::Message, |event| {
///         if let Event::Message(payload) = event {
///             println!("received {payload:?}");
///         }
///     });
///
///     // Buffered until the connection opens
///     socket.send("hello");
///
///     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
///     socket.close(1000).await;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct ReconnectingSocket {
    inner: Arc<SocketInner>,
}

struct SocketInner {
    /// Sender channel for requests to the driver task
    commands: mpsc::UnboundedSender<Command>,
    /// Registered `on`/`once` listeners, shared with the driver
    listeners: Arc<Listeners>,
    /// Kept only to hand out fresh receivers via `resubscribe`
    events: broadcast::Receiver<Event>,
    /// Watch channel receiver for lifecycle changes
    state_rx: watch::Receiver<ConnectionState>,
    /// Set by the first `close` call
    closed: AtomicBool,
}

impl ReconnectingSocket {
    /// Validate `settings`, then spawn the driver and start connecting.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect<T, C>(target: T, settings: Settings, connector: C) -> Result<Self>
    where
        T: Into<Target>,
        C: Connector,
    {
        let target = target.into();
        settings.validate()?;
        target.check()?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, events) = broadcast::channel(BROADCAST_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let listeners = Arc::new(Listeners::default());

        let driver = Driver::new(
            settings,
            target,
            Arc::new(connector),
            commands_rx,
            Emitter::new(Arc::clone(&listeners), broadcast_tx),
            state_tx,
        );
        tokio::spawn(driver.run());

        Ok(Self {
            inner: Arc::new(SocketInner {
                commands: commands_tx,
                listeners,
                events,
                state_rx,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Connect using the bundled tokio-tungstenite transport.
    #[cfg(feature = "tungstenite")]
    pub fn websocket<T: Into<Target>>(target: T, settings: Settings) -> Result<Self> {
        Self::connect(
            target,
            settings,
            crate::transport::tungstenite::WebSocketConnector::default(),
        )
    }

    /// Send a payload, or buffer it while disconnected.
    ///
    /// Never fails: without a connection and with buffering disabled the payload is dropped,
    /// and after [`close`](Self::close) every send is a no-op.
    pub fn send<P: Into<Payload>>(&self, payload: P) {
        self.command(Command::Send(payload.into()));
    }

    /// Serialize `message` to JSON and [`send`](Self::send) it as text.
    pub fn send_json<R: Serialize>(&self, message: &R) -> Result<()> {
        let json = serde_json::to_string(message)?;
        self.send(json);
        Ok(())
    }

    /// Drop the current connection (or attempt) and connect again after the current backoff
    /// delay. A pending reconnect is replaced.
    pub fn reconnect(&self, code: u16) {
        self.command(Command::Reconnect(code));
    }

    /// Close permanently.
    ///
    /// The first call tears down the connection, cancels every timer and removes every listener
    /// before returning. Later calls return immediately.
    pub async fn close(&self, code: u16) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let (done_tx, done_rx) = oneshot::channel();
        if self
            .inner
            .commands
            .send(Command::Close {
                code,
                done: done_tx,
            })
            .is_ok()
        {
            // An error only means the driver already stopped
            _ = done_rx.await;
        }
        self.inner.listeners.clear();
    }

    /// Call `handler` for every event of `kind`.
    ///
    /// To use the socket from inside `handler`, capture a [`WeakSocket`].
    ///
    /// ```rust, no_run
    /// # use resilient_ws::{EventKind, ReconnectingSocket, Settings};
    /// # async fn run() -> resilient_ws::Result<()> {
    /// let socket = ReconnectingSocket::websocket("wss://feed.example.com", Settings::default())?;
    /// let weak = socket.downgrade();
    /// socket.on(EventKind::Open, move |_| {
    ///     if let Some(socket) = weak.upgrade() {
    ///         socket.send(r#"{"op":"subscribe"}"#);
    ///     }
    /// });
    /// # Ok(())
    /// # }
    /// ```
    pub fn on<F>(&self, kind: EventKind, handler: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.listeners.add(kind, false, Arc::new(handler))
    }

    /// Call `handler` for the next event of `kind` only.
    pub fn once<F>(&self, kind: EventKind, handler: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.listeners.add(kind, true, Arc::new(handler))
    }

    /// Returns `false` if no such listener was registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    /// Number of registered `on`/`once` listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Subscribe to every event emitted from now on.
    ///
    /// The receiver reports `Closed` once the socket has been closed permanently.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.events.resubscribe()
    }

    /// Every event emitted from now on, as a stream that ends after a permanent close.
    pub fn events(&self) -> impl Stream<Item = Result<Event>> + use<> {
        let mut rx = self.subscribe();

        try_stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(RecvError::Lagged(count)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Event stream lagged, missed {count} events");
                        Err(Lagged { count })?;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    /// Stop treating probe replies as proof of life, so the next heartbeat times out.
    ///
    /// Meant for tests that need to simulate a silently dead peer.
    pub fn ignore_heartbeat_replies(&self) {
        self.command(Command::IgnoreHeartbeatReplies);
    }

    /// Get the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_rx.borrow()
    }

    /// Subscribe to lifecycle state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_rx.clone()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// A handle that does not keep the socket alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakSocket {
        WeakSocket {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn command(&self, command: Command) {
        if self.is_closed() {
            return;
        }
        // The driver only goes away after a permanent close
        _ = self.inner.commands.send(command);
    }
}

/// A [`ReconnectingSocket`] handle that does not count towards keeping it open.
///
/// Obtained from [`ReconnectingSocket::downgrade`].
#[derive(Clone)]
pub struct WeakSocket {
    inner: Weak<SocketInner>,
}

impl WeakSocket {
    /// Returns `None` once every strong handle has been dropped.
    #[must_use]
    pub fn upgrade(&self) -> Option<ReconnectingSocket> {
        self.inner
            .upgrade()
            .map(|inner| ReconnectingSocket { inner })
    }
}
