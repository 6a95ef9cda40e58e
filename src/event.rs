//! Events emitted by a [`ReconnectingSocket`](crate::ReconnectingSocket) and the listener
//! registry behind `on`/`once`/`remove_listener`.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::transport::Payload;

/// Broadcast channel capacity for event subscribers.
pub(crate) const BROADCAST_CAPACITY: usize = 1024;

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A connection was established; buffered messages have been flushed
    Open,
    /// A payload arrived from the peer
    Message(Payload),
    /// Something went wrong; a reconnect is already scheduled
    Error(ErrorReason),
    /// An open connection went away
    Close(CloseInfo),
}

impl Event {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Open => EventKind::Open,
            Self::Message(_) => EventKind::Message,
            Self::Error(_) => EventKind::Error,
            Self::Close(_) => EventKind::Close,
        }
    }
}

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum EventKind {
    Open,
    Message,
    Error,
    Close,
}

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseInfo {
    /// WebSocket close code
    pub code: u16,
    /// `false` only when the caller closed the socket permanently
    pub will_reconnect: bool,
}

impl CloseInfo {
    #[must_use]
    pub const fn new(code: u16, will_reconnect: bool) -> Self {
        Self {
            code,
            will_reconnect,
        }
    }
}

/// Why a connection attempt or an open connection failed.
///
/// None of these are fatal: each is followed by a reconnect with backoff.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorReason {
    /// The transport did not open within `connection_timeout`
    ConnectionTimeout,
    /// No reply to a liveness probe within `heartbeat_timeout`
    HeartbeatTimeout,
    /// The target resolver failed or produced an unusable URL
    Resolution(String),
    /// The transport reported an error
    Transport(String),
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionTimeout => write!(f, "connection timeout"),
            Self::HeartbeatTimeout => write!(f, "heartbeat timeout"),
            Self::Resolution(reason) => write!(f, "target resolution failed: {reason}"),
            Self::Transport(reason) => write!(f, "transport error: {reason}"),
        }
    }
}

impl StdError for ErrorReason {}

/// Handle returned by `on`/`once`, used to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

struct Listener {
    kind: EventKind,
    once: bool,
    handler: Handler,
}

#[derive(Default)]
pub(crate) struct Listeners {
    next_id: AtomicU64,
    entries: DashMap<ListenerId, Listener>,
}

impl Listeners {
    pub(crate) fn add(&self, kind: EventKind, once: bool, handler: Handler) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.insert(
            id,
            Listener {
                kind,
                once,
                handler,
            },
        );
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub(crate) fn clear(&self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Invoke every listener for the event's kind, in registration order.
    ///
    /// Handlers run without any map lock held, so they may add or remove listeners.
    pub(crate) fn dispatch(&self, event: &Event) {
        let kind = event.kind();
        let mut matching: Vec<(ListenerId, bool, Handler)> = self
            .entries
            .iter()
            .filter(|entry| entry.kind == kind)
            .map(|entry| (*entry.key(), entry.once, Arc::clone(&entry.handler)))
            .collect();
        matching.sort_by_key(|(id, _, _)| *id);

        for (id, once, handler) in matching {
            // A once-listener fires only if this call is the one that removed it.
            if once && self.entries.remove(&id).is_none() {
                continue;
            }
            handler(event);
        }
    }
}

/// Fans events out to listeners and broadcast subscribers.
pub(crate) struct Emitter {
    listeners: Arc<Listeners>,
    broadcast: broadcast::Sender<Event>,
}

impl Emitter {
    pub(crate) fn new(listeners: Arc<Listeners>, broadcast: broadcast::Sender<Event>) -> Self {
        Self {
            listeners,
            broadcast,
        }
    }

    pub(crate) fn emit(&self, event: Event) {
        #[cfg(feature = "tracing")]
        tracing::trace!(kind = %event.kind(), "Emitting event");

        self.listeners.dispatch(&event);
        // No subscribers is fine
        _ = self.broadcast.send(event);
    }

    pub(crate) fn detach(&self) {
        self.listeners.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Handler) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = Arc::clone(&log);
        let make = move |name: &str| -> Handler {
            let log = Arc::clone(&log_clone);
            let name = name.to_owned();
            Arc::new(move |event: &Event| {
                log.lock().unwrap().push(format!("{name}:{}", event.kind()));
            })
        };
        (log, make)
    }

    #[test]
    fn dispatches_by_kind_in_registration_order() {
        let listeners = Listeners::default();
        let (log, make) = recorder();

        listeners.add(EventKind::Open, false, make("a"));
        listeners.add(EventKind::Close, false, make("b"));
        listeners.add(EventKind::Open, false, make("c"));

        listeners.dispatch(&Event::Open);

        assert_eq!(*log.lock().unwrap(), vec!["a:open", "c:open"]);
    }

    #[test]
    fn once_listener_fires_a_single_time() {
        let listeners = Listeners::default();
        let (log, make) = recorder();

        listeners.add(EventKind::Open, true, make("once"));
        listeners.dispatch(&Event::Open);
        listeners.dispatch(&Event::Open);

        assert_eq!(*log.lock().unwrap(), vec!["once:open"]);
        assert_eq!(listeners.len(), 0);
    }

    #[test]
    fn removed_listener_is_not_invoked() {
        let listeners = Listeners::default();
        let (log, make) = recorder();

        let id = listeners.add(EventKind::Error, false, make("gone"));
        assert!(listeners.remove(id), "listener should be registered");
        assert!(!listeners.remove(id), "second removal is a no-op");

        listeners.dispatch(&Event::Error(ErrorReason::HeartbeatTimeout));

        assert!(log.lock().unwrap().is_empty(), "no handler should run");
    }

    #[test]
    fn handler_may_remove_listeners_while_dispatching() {
        let listeners = Arc::new(Listeners::default());
        let inner = Arc::clone(&listeners);

        listeners.add(
            EventKind::Open,
            false,
            Arc::new(move |_event: &Event| inner.clear()),
        );
        listeners.dispatch(&Event::Open);

        assert_eq!(listeners.len(), 0);
    }

    #[test]
    fn emitter_reaches_listeners_and_subscribers() {
        let listeners = Arc::new(Listeners::default());
        let (tx, mut rx) = broadcast::channel(8);
        let emitter = Emitter::new(Arc::clone(&listeners), tx);
        let (log, make) = recorder();
        listeners.add(EventKind::Close, false, make("l"));

        emitter.emit(Event::Close(CloseInfo::new(1000, true)));

        assert_eq!(*log.lock().unwrap(), vec!["l:close"]);
        assert_eq!(
            rx.try_recv().unwrap(),
            Event::Close(CloseInfo::new(1000, true))
        );

        emitter.detach();
        assert_eq!(listeners.len(), 0);
    }

    #[test]
    fn error_reasons_are_human_readable() {
        assert_eq!(
            ErrorReason::ConnectionTimeout.to_string(),
            "connection timeout"
        );
        assert_eq!(ErrorReason::HeartbeatTimeout.to_string(), "heartbeat timeout");
        assert_eq!(
            ErrorReason::Resolution("no nodes".to_owned()).to_string(),
            "target resolution failed: no nodes"
        );
        assert_eq!(
            ErrorReason::Transport("reset by peer".to_owned()).to_string(),
            "transport error: reset by peer"
        );
    }
}
