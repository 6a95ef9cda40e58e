use std::sync::Arc;

use futures::FutureExt as _;
use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot, watch};

use super::machine::{Action, ConnectionState, Input, Machine};
use super::timer::Timer;
use crate::config::Settings;
use crate::event::{Emitter, ErrorReason};
use crate::target::Target;
use crate::transport::{
    ABNORMAL_CLOSURE, Connection, Connector, NORMAL_CLOSURE, Payload, TransportEvent,
};

type Attempt = BoxFuture<'static, Result<Connection, ErrorReason>>;

/// Requests from [`ReconnectingSocket`](crate::ReconnectingSocket) handles.
#[derive(Debug)]
pub(crate) enum Command {
    Send(Payload),
    Reconnect(u16),
    Close {
        code: u16,
        done: oneshot::Sender<()>,
    },
    IgnoreHeartbeatReplies,
}

/// Owns one socket's connection, timers and state machine.
///
/// Runs as a single task; every transition happens here, one at a time.
pub(crate) struct Driver {
    machine: Machine,
    settings: Settings,
    target: Target,
    connector: Arc<dyn Connector>,
    commands: mpsc::UnboundedReceiver<Command>,
    emitter: Emitter,
    state_tx: watch::Sender<ConnectionState>,
    attempt: Option<Attempt>,
    connection: Option<Connection>,
    connect_timer: Timer,
    heartbeat_timer: Timer,
    heartbeat_timeout: Timer,
    reconnect_timer: Timer,
    close_acks: Vec<oneshot::Sender<()>>,
}

impl Driver {
    pub(crate) fn new(
        settings: Settings,
        target: Target,
        connector: Arc<dyn Connector>,
        commands: mpsc::UnboundedReceiver<Command>,
        emitter: Emitter,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        Self {
            machine: Machine::new(&settings),
            settings,
            target,
            connector,
            commands,
            emitter,
            state_tx,
            attempt: None,
            connection: None,
            connect_timer: Timer::default(),
            heartbeat_timer: Timer::default(),
            heartbeat_timeout: Timer::default(),
            reconnect_timer: Timer::default(),
            close_acks: Vec::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        self.dispatch(Input::Start);

        while !self.machine.state().is_terminated() {
            let input = self.next_input().await;
            self.dispatch(input);
        }

        for done in self.close_acks.drain(..) {
            _ = done.send(());
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Socket driver stopped");
    }

    /// Wait for whatever happens next.
    ///
    /// Transport events are polled ahead of timers so a reply that arrived in time wins over a
    /// heartbeat timeout that is due in the same instant. Due timers go before commands, so a
    /// caller sending in a tight loop cannot hold them off. Commands go before the attempt,
    /// which makes a payload sent before the open count as sent while disconnected.
    async fn next_input(&mut self) -> Input {
        let Self {
            commands,
            attempt,
            connection,
            connect_timer,
            heartbeat_timer,
            heartbeat_timeout,
            reconnect_timer,
            close_acks,
            ..
        } = self;

        tokio::select! {
            biased;

            event = next_event(connection) => match event {
                Some(TransportEvent::Message(payload)) => Input::Received(payload),
                Some(TransportEvent::Pong) => Input::Pong,
                Some(TransportEvent::Error(reason)) => Input::TransportError(reason),
                Some(TransportEvent::Closed { code }) => Input::TransportClosed(code),
                None => Input::TransportClosed(ABNORMAL_CLOSURE),
            },

            () = connect_timer.fired() => Input::ConnectTimeout,
            () = heartbeat_timeout.fired() => Input::HeartbeatTimeout,
            () = heartbeat_timer.fired() => Input::HeartbeatDue,
            () = reconnect_timer.fired() => Input::ReconnectDue,

            command = commands.recv() => match command {
                Some(Command::Send(payload)) => Input::Send(payload),
                Some(Command::Reconnect(code)) => Input::Reconnect(code),
                Some(Command::Close { code, done }) => {
                    close_acks.push(done);
                    Input::Close(code)
                }
                Some(Command::IgnoreHeartbeatReplies) => Input::IgnoreHeartbeatReplies,
                // Every handle is gone, nobody can close us anymore
                None => Input::Close(NORMAL_CLOSURE),
            },

            result = next_attempt(attempt) => match result {
                Ok(opened) => {
                    *connection = Some(opened);
                    Input::Opened
                }
                Err(reason) => Input::AttemptFailed(reason),
            },
        }
    }

    fn dispatch(&mut self, input: Input) {
        for action in self.machine.handle(input) {
            self.apply(action);
        }
        self.state_tx.send_replace(self.machine.state());
    }

    fn apply(&mut self, action: Action) {
        match action {
            Action::BeginAttempt => {
                self.connect_timer.arm(self.settings.connection_timeout);
                self.attempt = Some(self.open_attempt());
            }
            Action::CancelConnectTimeout => self.connect_timer.cancel(),
            Action::StartHeartbeat => {
                self.heartbeat_timeout.cancel();
                self.heartbeat_timer.arm(self.settings.heartbeat_interval);
            }
            Action::SendPing => {
                if let Some(connection) = &self.connection
                    && let Err(e) = connection.ping()
                {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(error = %e, "Unable to send heartbeat probe");
                    #[cfg(not(feature = "tracing"))]
                    let _: &crate::error::Error = &e;
                }
                // An unanswered probe keeps its original deadline
                if !self.heartbeat_timeout.is_armed() {
                    self.heartbeat_timeout.arm(self.settings.heartbeat_timeout);
                }
                self.heartbeat_timer.arm(self.settings.heartbeat_interval);
            }
            Action::CancelHeartbeatTimeout => self.heartbeat_timeout.cancel(),
            Action::Transmit(payload) => match &self.connection {
                Some(connection) => {
                    if let Err(e) = connection.send(payload) {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(error = %e, "Unable to hand message to transport");
                        #[cfg(not(feature = "tracing"))]
                        let _: &crate::error::Error = &e;
                    }
                }
                None => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("No connection to transmit on, dropping message");
                }
            },
            Action::Emit(event) => self.emitter.emit(event),
            Action::Teardown(code) => self.teardown(code),
            Action::ScheduleReconnect(delay) => self.reconnect_timer.arm(delay),
            Action::CancelReconnect => self.reconnect_timer.cancel(),
            Action::DetachListeners => self.emitter.detach(),
        }
    }

    fn teardown(&mut self, code: u16) {
        // Dropping the attempt cancels resolution and connect, discarding any late result
        self.attempt = None;
        self.connect_timer.cancel();
        self.heartbeat_timer.cancel();
        self.heartbeat_timeout.cancel();

        if let Some(connection) = self.connection.take()
            && let Err(e) = connection.close(code)
        {
            // The transport may already be gone; nothing to report
            #[cfg(feature = "tracing")]
            tracing::debug!(error = %e, code, "Ignoring failure while closing connection");
            #[cfg(not(feature = "tracing"))]
            let _: &crate::error::Error = &e;
        }
    }

    fn open_attempt(&self) -> Attempt {
        let target = self.target.clone();
        let connector = Arc::clone(&self.connector);

        async move {
            let url = target
                .resolve()
                .await
                .map_err(|e| ErrorReason::Resolution(e.to_string()))?;

            #[cfg(feature = "tracing")]
            tracing::debug!(%url, "Opening transport");

            connector
                .connect(&url)
                .await
                .map_err(|e| ErrorReason::Transport(e.to_string()))
        }
        .boxed()
    }
}

async fn next_event(connection: &mut Option<Connection>) -> Option<TransportEvent> {
    match connection {
        Some(connection) => connection.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_attempt(attempt: &mut Option<Attempt>) -> Result<Connection, ErrorReason> {
    let Some(future) = attempt.as_mut() else {
        return std::future::pending().await;
    };
    let result = future.await;
    *attempt = None;
    result
}
