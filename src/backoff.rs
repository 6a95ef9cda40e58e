//! Reconnect delay calculation.
//!
//! [`next_delay`] is the pure step function; [`ReconnectBackoff`] holds the delay to use for
//! the *next* reconnect and plugs into the [`backoff`] crate's [`Backoff`] trait.

use std::time::Duration;

use backoff::backoff::Backoff;

use crate::config::Settings;

/// Computes `min(delay * multiplier, max)`.
///
/// Products that are not representable (overflow, NaN) saturate at `max`.
#[must_use]
#[expect(
    clippy::float_arithmetic,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "The multiplier is fractional; the product is range-checked against `max` before converting back"
)]
pub fn next_delay(delay: Duration, multiplier: f64, max: Duration) -> Duration {
    let next = delay.as_nanos() as f64 * multiplier;
    if !next.is_finite() || next >= max.as_nanos() as f64 {
        return max;
    }

    Duration::from_nanos(next as u64).min(max)
}

/// Exponential reconnect delay without jitter.
///
/// [`Backoff::next_backoff`] hands out the current delay and then advances it, so after a
/// [`Backoff::reset`] the first reconnect waits `min`, the second `min * multiplier`, and so on
/// up to `max`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectBackoff {
    current: Duration,
    min: Duration,
    max: Duration,
    multiplier: f64,
}

impl ReconnectBackoff {
    #[must_use]
    pub fn new(min: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            current: min,
            min,
            max,
            multiplier,
        }
    }

    /// The delay the next reconnect will wait.
    #[must_use]
    pub fn current(&self) -> Duration {
        self.current
    }
}

impl From<&Settings> for ReconnectBackoff {
    fn from(settings: &Settings) -> Self {
        Self::new(
            settings.min_reconnect_delay,
            settings.max_reconnect_delay,
            settings.reconnect_delay_multiplier,
        )
    }
}

impl Backoff for ReconnectBackoff {
    fn reset(&mut self) {
        self.current = self.min;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        let delay = self.current;
        self.current = next_delay(delay, self.multiplier, self.max);
        Some(delay)
    }
}
