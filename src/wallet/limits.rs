//! Sliding-window rate limiter for account creation and import

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::error::{ValidationError, WalletError};

#[derive(Debug)]
pub struct RateLimiter {
    max_ops: usize,
    window: Duration,
    events: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(max_ops: usize, window: Duration) -> Self {
        Self {
            max_ops,
            window,
            events: VecDeque::with_capacity(max_ops),
        }
    }

    /// Fail if `max_ops` operations already happened within the window ending at `now`.
    pub fn check(&mut self, now: Instant) -> Result<(), WalletError> {
        self.prune(now);
        if self.events.len() < self.max_ops {
            return Ok(());
        }

        let retry_after = self
            .events
            .front()
            .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
            .unwrap_or_default();
        log::warn!("Account operation rate limit hit");
        Err(ValidationError::RateLimited {
            retry_after_secs: retry_after.as_secs().max(1),
        }
        .into())
    }

    /// Check and count an attempt in one step. Attempts count whether or
    /// not the operation later succeeds.
    pub fn acquire(&mut self, now: Instant) -> Result<(), WalletError> {
        self.check(now)?;
        self.events.push_back(now);
        Ok(())
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.events.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }
}
