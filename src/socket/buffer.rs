use std::collections::VecDeque;
use std::collections::vec_deque::IntoIter;

use crate::config::OverflowPolicy;
use crate::transport::Payload;

/// Outbound payloads held while no connection is open.
#[derive(Debug, Default)]
pub(crate) struct MessageBuffer {
    queue: VecDeque<Payload>,
    capacity: Option<usize>,
    policy: OverflowPolicy,
}

impl MessageBuffer {
    pub(crate) fn new(capacity: Option<usize>, policy: OverflowPolicy) -> Self {
        Self {
            queue: VecDeque::new(),
            capacity,
            policy,
        }
    }

    /// Queue a payload. Returns whichever payload had to be dropped to respect the capacity.
    pub(crate) fn push(&mut self, payload: Payload) -> Option<Payload> {
        let full = self
            .capacity
            .is_some_and(|capacity| self.queue.len() >= capacity);

        if !full {
            self.queue.push_back(payload);
            return None;
        }

        match self.policy {
            OverflowPolicy::DropOldest => {
                let evicted = self.queue.pop_front();
                self.queue.push_back(payload);
                evicted
            }
            OverflowPolicy::DropNewest => Some(payload),
        }
    }

    /// Take every queued payload in FIFO order, leaving the buffer empty.
    pub(crate) fn drain(&mut self) -> IntoIter<Payload> {
        std::mem::take(&mut self.queue).into_iter()
    }

    pub(crate) fn clear(&mut self) {
        self.queue.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }
}
