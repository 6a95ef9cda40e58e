//! Lifecycle state machine.
//!
//! [`Machine::handle`] is the only place controller state changes. It never performs I/O: it
//! returns the [`Action`]s the driver must carry out, in order.

use std::time::{Duration, Instant};

use backoff::backoff::Backoff as _;

use super::buffer::MessageBuffer;
use crate::backoff::ReconnectBackoff;
use crate::config::Settings;
use crate::event::{CloseInfo, ErrorReason, Event};
use crate::transport::{ABNORMAL_CLOSURE, Payload};

/// Where a [`ReconnectingSocket`](crate::ReconnectingSocket) is in its lifecycle.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, no attempt started yet
    Idle,
    /// Resolving the target and opening the transport
    Connecting {
        /// Attempt number since the last successful open, starting at 1
        attempt: u32,
    },
    /// Connected and exchanging heartbeats
    Open {
        /// When the connection was established
        since: Instant,
    },
    /// Tearing down the current connection
    Closing,
    /// Waiting out the backoff delay before the next attempt
    ReconnectScheduled {
        /// Attempts made since the last successful open
        attempt: u32,
        /// How long until the next attempt starts
        delay: Duration,
    },
    /// Permanently closed by the caller
    Terminated,
}

impl ConnectionState {
    /// Check if the connection is currently open.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Open { .. })
    }

    #[must_use]
    pub const fn is_terminated(self) -> bool {
        matches!(self, Self::Terminated)
    }
}

/// Everything that can move the machine.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Input {
    /// The socket was just created
    Start,
    /// The reconnect delay elapsed
    ReconnectDue,
    /// The transport opened
    Opened,
    /// Resolution or the transport failed before opening
    AttemptFailed(ErrorReason),
    /// `connection_timeout` elapsed before the transport opened
    ConnectTimeout,
    /// `heartbeat_interval` elapsed
    HeartbeatDue,
    /// The peer answered a probe
    Pong,
    /// `heartbeat_timeout` elapsed without a reply
    HeartbeatTimeout,
    /// A payload arrived
    Received(Payload),
    TransportError(String),
    TransportClosed(u16),
    /// The caller sent a payload
    Send(Payload),
    /// The caller asked for a reconnect
    Reconnect(u16),
    /// The caller closed the socket for good
    Close(u16),
    IgnoreHeartbeatReplies,
}

/// Side effects requested by [`Machine::handle`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Action {
    /// Start resolving and connecting, and arm the connection timeout
    BeginAttempt,
    CancelConnectTimeout,
    /// Arm the heartbeat interval
    StartHeartbeat,
    /// Probe the peer, arm the heartbeat timeout unless a probe is already unanswered, and
    /// re-arm the interval
    SendPing,
    CancelHeartbeatTimeout,
    /// Write a payload to the open connection
    Transmit(Payload),
    Emit(Event),
    /// Drop any in-flight attempt, stop connection and heartbeat timers, and close the
    /// connection with the given code
    Teardown(u16),
    /// Arm the reconnect timer, replacing any pending one
    ScheduleReconnect(Duration),
    CancelReconnect,
    /// Remove every registered listener
    DetachListeners,
}

#[derive(Debug)]
pub(crate) struct Machine {
    state: ConnectionState,
    backoff: ReconnectBackoff,
    buffer: MessageBuffer,
    buffering: bool,
    ignore_heartbeat_replies: bool,
    attempt: u32,
}

impl Machine {
    pub(crate) fn new(settings: &Settings) -> Self {
        Self {
            state: ConnectionState::Idle,
            backoff: ReconnectBackoff::from(settings),
            buffer: MessageBuffer::new(settings.max_buffered_messages, settings.overflow_policy),
            buffering: settings.message_buffering,
            ignore_heartbeat_replies: false,
            attempt: 0,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    /// The delay the next reconnect would wait.
    #[cfg(test)]
    pub(crate) fn current_delay(&self) -> Duration {
        self.backoff.current()
    }

    #[cfg(test)]
    pub(crate) fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub(crate) fn handle(&mut self, input: Input) -> Vec<Action> {
        if self.state.is_terminated() {
            return Vec::new();
        }

        let open = self.state.is_connected();
        let connecting = matches!(self.state, ConnectionState::Connecting { .. });

        match input {
            Input::Start | Input::ReconnectDue => self.begin_attempt(),
            Input::Opened => self.opened(),
            Input::AttemptFailed(reason) => self.attempt_failed(reason),
            Input::ConnectTimeout => self.attempt_failed(ErrorReason::ConnectionTimeout),
            Input::HeartbeatDue if open => vec![Action::SendPing],
            Input::Pong if open && !self.ignore_heartbeat_replies => {
                vec![Action::CancelHeartbeatTimeout]
            }
            Input::HeartbeatTimeout if open => {
                self.connection_lost(Some(ErrorReason::HeartbeatTimeout), ABNORMAL_CLOSURE)
            }
            Input::Received(payload) if open => vec![Action::Emit(Event::Message(payload))],
            Input::TransportError(reason) if open => {
                self.connection_lost(Some(ErrorReason::Transport(reason)), ABNORMAL_CLOSURE)
            }
            Input::TransportError(reason) if connecting => {
                self.attempt_failed(ErrorReason::Transport(reason))
            }
            Input::TransportClosed(code) if open => self.connection_lost(None, code),
            Input::TransportClosed(code) if connecting => self.attempt_failed(
                ErrorReason::Transport(format!("closed with code {code} before opening")),
            ),
            Input::Send(payload) => self.send(payload),
            Input::Reconnect(code) => self.reconnect(code),
            Input::Close(code) => self.close(code),
            Input::IgnoreHeartbeatReplies => {
                self.ignore_heartbeat_replies = true;
                Vec::new()
            }
            // Stale timer or transport input for a connection that is already gone
            Input::HeartbeatDue
            | Input::Pong
            | Input::HeartbeatTimeout
            | Input::Received(_)
            | Input::TransportError(_)
            | Input::TransportClosed(_) => Vec::new(),
        }
    }

    fn begin_attempt(&mut self) -> Vec<Action> {
        match self.state {
            ConnectionState::Idle | ConnectionState::ReconnectScheduled { .. } => {
                self.attempt = self.attempt.saturating_add(1);
                self.state = ConnectionState::Connecting {
                    attempt: self.attempt,
                };

                #[cfg(feature = "tracing")]
                tracing::debug!(attempt = self.attempt, "Connecting");

                vec![Action::BeginAttempt]
            }
            _ => Vec::new(),
        }
    }

    fn opened(&mut self) -> Vec<Action> {
        if !matches!(self.state, ConnectionState::Connecting { .. }) {
            return Vec::new();
        }

        let buffered = self.buffer.len();

        #[cfg(feature = "tracing")]
        tracing::debug!(attempt = self.attempt, buffered, "Connection open");

        self.state = ConnectionState::Open {
            since: Instant::now(),
        };
        self.attempt = 0;
        self.backoff.reset();

        let mut actions = Vec::with_capacity(buffered + 3);
        actions.extend([Action::CancelConnectTimeout, Action::StartHeartbeat]);
        actions.extend(self.buffer.drain().map(Action::Transmit));
        actions.push(Action::Emit(Event::Open));
        actions
    }

    fn attempt_failed(&mut self, reason: ErrorReason) -> Vec<Action> {
        if !matches!(self.state, ConnectionState::Connecting { .. }) {
            return Vec::new();
        }

        #[cfg(feature = "tracing")]
        tracing::warn!(attempt = self.attempt, %reason, "Connection attempt failed");

        let mut actions = vec![Action::Emit(Event::Error(reason))];
        actions.extend(self.schedule_reconnect(ABNORMAL_CLOSURE));
        actions
    }

    fn connection_lost(&mut self, reason: Option<ErrorReason>, code: u16) -> Vec<Action> {
        #[cfg(feature = "tracing")]
        tracing::warn!(code, reason = ?reason, "Connection lost");

        let mut actions = Vec::with_capacity(4);
        if let Some(reason) = reason {
            actions.push(Action::Emit(Event::Error(reason)));
        }
        actions.push(Action::Emit(Event::Close(CloseInfo::new(code, true))));
        actions.extend(self.schedule_reconnect(code));
        actions
    }

    /// Tear down and wait out the current delay, then advance the delay.
    fn schedule_reconnect(&mut self, code: u16) -> Vec<Action> {
        self.state = ConnectionState::Closing;

        let delay = self
            .backoff
            .next_backoff()
            .unwrap_or_else(|| self.backoff.current());
        self.state = ConnectionState::ReconnectScheduled {
            attempt: self.attempt,
            delay,
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(?delay, attempt = self.attempt, "Reconnect scheduled");

        vec![Action::Teardown(code), Action::ScheduleReconnect(delay)]
    }

    fn send(&mut self, payload: Payload) -> Vec<Action> {
        if self.state.is_connected() {
            return vec![Action::Transmit(payload)];
        }

        if self.buffering {
            if let Some(dropped) = self.buffer.push(payload) {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    bytes = dropped.as_bytes().len(),
                    "Message buffer full, dropping a message"
                );
                #[cfg(not(feature = "tracing"))]
                let _: &Payload = &dropped;
            }
        } else {
            #[cfg(feature = "tracing")]
            tracing::trace!("Not connected and buffering is disabled, dropping message");
        }

        Vec::new()
    }

    fn reconnect(&mut self, code: u16) -> Vec<Action> {
        let mut actions = Vec::with_capacity(3);
        if self.state.is_connected() {
            actions.push(Action::Emit(Event::Close(CloseInfo::new(code, true))));
        }
        actions.extend(self.schedule_reconnect(code));
        actions
    }

    fn close(&mut self, code: u16) -> Vec<Action> {
        let was_open = self.state.is_connected();

        self.state = ConnectionState::Closing;
        self.buffer.clear();

        let mut actions = vec![Action::Teardown(code), Action::CancelReconnect];
        if was_open {
            actions.push(Action::Emit(Event::Close(CloseInfo::new(code, false))));
        }
        actions.push(Action::DetachListeners);

        self.state = ConnectionState::Terminated;

        #[cfg(feature = "tracing")]
        tracing::debug!(code, "Closed permanently");

        actions
    }
}
