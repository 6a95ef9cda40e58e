use std::future::pending;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Instant, Sleep, sleep};

/// Deadline used when `now + after` does not fit in an [`Instant`], matching what
/// [`tokio::time::sleep`] does for oversized durations.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// A single owned deadline.
///
/// Arming replaces any previous deadline, so at most one instance of each timer is ever
/// outstanding. [`Timer::fired`] never completes while the timer is disarmed, which lets it sit
/// in a `select!` unconditionally.
#[derive(Debug, Default)]
pub(crate) struct Timer {
    deadline: Option<Pin<Box<Sleep>>>,
}

impl Timer {
    pub(crate) fn arm(&mut self, after: Duration) {
        match self.deadline.as_mut() {
            Some(deadline) => deadline.as_mut().reset(deadline_after(after)),
            None => self.deadline = Some(Box::pin(sleep(after))),
        }
    }

    pub(crate) fn cancel(&mut self) {
        self.deadline = None;
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Completes once the armed deadline passes, disarming the timer.
    ///
    /// Cancel safe: dropping the future before it completes leaves the deadline armed.
    pub(crate) async fn fired(&mut self) {
        if let Some(deadline) = self.deadline.as_mut() {
            deadline.as_mut().await;
            self.deadline = None;
        } else {
            pending::<()>().await;
        }
    }
}

fn deadline_after(after: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(after).unwrap_or_else(|| now + FAR_FUTURE)
}
