//! Debounced flush deadlines.

use std::time::{Duration, Instant};

/// One-shot deadline armed by the first change after a flush.
///
/// Later changes do not push the deadline back, so a steady stream of
/// mutations still flushes once per `delay`.
#[derive(Debug, Clone)]
pub struct FlushTimer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl FlushTimer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Arms the timer unless it already is. Returns whether it was armed now.
    pub fn arm(&mut self, now: Instant) -> bool {
        if self.deadline.is_some() {
            return false;
        }
        self.deadline = Some(now + self.delay);
        true
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    /// Disarms and returns true if the deadline has passed.
    pub fn fire_if_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}
