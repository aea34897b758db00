//! Source-side throttle for event pushes

use std::time::Duration;
use tokio::time::Instant;

/// Admits one push per window
#[derive(Debug, Clone)]
pub struct RateLimiter {
    window: Duration,
    last_push: Option<Instant>,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_push: None,
        }
    }

    /// True if nothing was pushed yet or the window has elapsed since the last push
    pub fn is_ready(&self) -> bool {
        match self.last_push {
            Some(last) => last.elapsed() >= self.window,
            None => true,
        }
    }

    /// Claim the current window. Returns false, without side effects, if it is taken.
    pub fn try_acquire(&mut self) -> bool {
        if !self.is_ready() {
            return false;
        }
        self.last_push = Some(Instant::now());
        true
    }

    pub fn reset(&mut self) {
        self.last_push = None;
    }
}
