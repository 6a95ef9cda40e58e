//! Talk to an echo server through a self-healing socket.
//!
//! Sends a message every second, logs every event, and closes after a handful of echoes.
//! Stop the server (or pull the network) while it runs to watch it reconnect and flush the
//! messages sent in the meantime.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=info,resilient_ws=debug cargo run --example echo --features tracing -- wss://echo.websocket.org
//! ```

use std::time::Duration;

use futures::StreamExt as _;
use resilient_ws::{Event, EventKind, ReconnectingSocket, Settings};
use tokio::time::interval;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_TARGET: &str = "wss://echo.websocket.org";
const ECHOES: usize = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let target = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_TARGET.to_owned());

    let settings = Settings::builder()
        .heartbeat_interval(Duration::from_secs(5))
        .max_buffered_messages(100)
        .build();
    let socket = ReconnectingSocket::websocket(target.as_str(), settings)?;

    socket.on(EventKind::Open, |_| info!("connected"));
    socket.on(EventKind::Close, |event| {
        if let Event::Close(info) = event {
            info!(code = info.code, will_reconnect = info.will_reconnect, "disconnected");
        }
    });

    let mut events = Box::pin(socket.events());
    let mut ticker = interval(Duration::from_secs(1));
    let mut sent = 0_usize;
    let mut echoes = 0_usize;

    while echoes < ECHOES {
        tokio::select! {
            _ = ticker.tick() => {
                sent += 1;
                socket.send(format!("hello #{sent}"));
                debug!(sent, state = ?socket.state(), "queued message");
            }
            event = events.next() => match event {
                Some(Ok(Event::Message(payload))) => {
                    echoes += 1;
                    info!(echo = ?payload.as_text(), echoes);
                }
                Some(Ok(Event::Error(reason))) => warn!(%reason, "socket error"),
                Some(Ok(_)) => {}
                Some(Err(e)) => warn!(error = %e, "event stream"),
                None => break,
            },
        }
    }

    socket.close(resilient_ws::DEFAULT_CLOSE_CODE).await;
    info!(sent, echoes, "done");

    Ok(())
}
