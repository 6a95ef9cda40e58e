use std::time::Duration;

use bon::Builder;
use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};

use crate::Result;
use crate::error::Error;

const DEFAULT_CONNECTION_TIMEOUT_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_HEARTBEAT_INTERVAL_DURATION: Duration = Duration::from_secs(5);
const DEFAULT_HEARTBEAT_TIMEOUT_DURATION: Duration = Duration::from_secs(15);
const DEFAULT_MIN_RECONNECT_DELAY_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_MAX_RECONNECT_DELAY_DURATION: Duration = Duration::from_secs(60);
const DEFAULT_RECONNECT_DELAY_MULTIPLIER: f64 = 2.0;

/// What to do with an outbound message when the buffer is already full.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverflowPolicy {
    /// Evict the oldest buffered message to make room
    #[default]
    DropOldest,
    /// Discard the message being sent
    DropNewest,
}

/// Behavior of a [`ReconnectingSocket`](crate::ReconnectingSocket).
///
/// Durations are whole milliseconds. When deserialized, every field is optional and uses
/// camelCase names with integer millisecond values:
///
/// ```
/// use std::time::Duration;
///
/// use resilient_ws::Settings;
///
/// let settings: Settings = serde_json::from_str(
///     r#"{ "heartbeatInterval": 2000, "messageBuffering": false }"#,
/// )?;
///
/// assert_eq!(settings.heartbeat_interval, Duration::from_secs(2));
/// assert!(!settings.message_buffering);
/// # Ok::<(), serde_json::Error>(())
/// ```
#[non_exhaustive]
#[serde_as]
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// How long a single attempt (target resolution plus transport open) may take
    #[builder(default = DEFAULT_CONNECTION_TIMEOUT_DURATION)]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub connection_timeout: Duration,
    /// Interval for sending liveness probes while connected
    #[builder(default = DEFAULT_HEARTBEAT_INTERVAL_DURATION)]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub heartbeat_interval: Duration,
    /// Maximum time to wait for a probe reply before considering the connection dead
    #[builder(default = DEFAULT_HEARTBEAT_TIMEOUT_DURATION)]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub heartbeat_timeout: Duration,
    /// Delay before the first reconnect after a healthy connection
    #[builder(default = DEFAULT_MIN_RECONNECT_DELAY_DURATION)]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub min_reconnect_delay: Duration,
    /// Upper bound for the reconnect delay
    #[builder(default = DEFAULT_MAX_RECONNECT_DELAY_DURATION)]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_reconnect_delay: Duration,
    /// Growth factor applied to the delay after every failed or closed cycle
    #[builder(default = DEFAULT_RECONNECT_DELAY_MULTIPLIER)]
    pub reconnect_delay_multiplier: f64,
    /// Keep messages sent while disconnected and flush them on the next open
    #[builder(default = true)]
    pub message_buffering: bool,
    /// Capacity of the outbound buffer. `None` means unbounded.
    pub max_buffered_messages: Option<usize>,
    /// Which message to drop once `max_buffered_messages` is reached
    #[builder(default)]
    pub overflow_policy: OverflowPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Settings {
    /// Check the invariants the connection controller relies on.
    pub fn validate(&self) -> Result<()> {
        for (name, duration) in [
            ("connection_timeout", self.connection_timeout),
            ("heartbeat_interval", self.heartbeat_interval),
            ("heartbeat_timeout", self.heartbeat_timeout),
            ("min_reconnect_delay", self.min_reconnect_delay),
            ("max_reconnect_delay", self.max_reconnect_delay),
        ] {
            if duration.is_zero() {
                return Err(Error::validation(format!("{name} must be positive")));
            }
            if duration.subsec_nanos() % 1_000_000 != 0 {
                return Err(Error::validation(format!(
                    "{name} must be a whole number of milliseconds, got {duration:?}"
                )));
            }
        }

        if !self.reconnect_delay_multiplier.is_finite() || self.reconnect_delay_multiplier < 1.0 {
            return Err(Error::validation(format!(
                "reconnect_delay_multiplier must be a finite number >= 1, got {}",
                self.reconnect_delay_multiplier
            )));
        }

        if self.min_reconnect_delay > self.max_reconnect_delay {
            return Err(Error::validation(format!(
                "min_reconnect_delay ({:?}) exceeds max_reconnect_delay ({:?})",
                self.min_reconnect_delay, self.max_reconnect_delay
            )));
        }

        if self.max_buffered_messages == Some(0) {
            return Err(Error::validation(
                "max_buffered_messages must be at least 1 when set",
            ));
        }

        Ok(())
    }
}
