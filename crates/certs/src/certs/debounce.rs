//! Coalescing of disk writes.
//!
//! Every state change triggers a write, but writes are held back until
//! things have been quiet for `delay`. A write that keeps being pushed back
//! still happens once `max_wait` has passed since the first trigger.

use std::time::Duration;

use tokio::time::Instant;

/// Rolling write deadline for one certificate
#[derive(Debug, Clone)]
pub struct Debouncer {
    delay: Duration,
    max_wait: Duration,
    pending_since: Option<Instant>,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(delay: Duration, max_wait: Duration) -> Self {
        Self {
            delay,
            max_wait,
            pending_since: None,
            deadline: None,
        }
    }

    /// Schedule a write, or push back one already scheduled
    pub fn trigger(&mut self, now: Instant) {
        let since = *self.pending_since.get_or_insert(now);
        let deadline = (now + self.delay).min(since + self.max_wait);
        self.deadline = Some(deadline);
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| d <= now)
    }

    /// Clear the pending write. Returns whether one was pending.
    pub fn take(&mut self) -> bool {
        self.pending_since = None;
        self.deadline.take().is_some()
    }
}
