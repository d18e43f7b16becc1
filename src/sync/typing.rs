//! Idle window for typing beacons.

use std::time::Duration;

use tokio::time::Instant;

/// How long after the last keystroke we announce "not typing".
pub const TYPING_IDLE: Duration = Duration::from_millis(2000);

/// Single-shot deadline, re-armed on every keystroke.
#[derive(Debug, Default)]
pub struct TypingDebouncer {
    deadline: Option<Instant>,
}

impl TypingDebouncer {
    /// Push the deadline out to `now + TYPING_IDLE`.
    pub fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + TYPING_IDLE);
    }

    pub fn clear(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns true exactly once when the deadline has passed.
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
