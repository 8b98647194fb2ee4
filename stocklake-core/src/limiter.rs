//! Sliding-window rate limiter shared by every worker.
//!
//! Guarantees that no more than `max` grants fall inside any trailing window,
//! measured by the instant each grant was recorded. Waiting callers sleep
//! without holding the lock and re-check the window after waking, so grants
//! are not FIFO.

use crate::config::ConfigError;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

pub const MINUTE: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct RateLimiter {
    max: usize,
    window: Duration,
    grants: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// At most `max` grants per rolling 60 seconds.
    pub fn per_minute(max: u32) -> Result<Self, ConfigError> {
        Self::new(max, MINUTE)
    }

    pub fn new(max: u32, window: Duration) -> Result<Self, ConfigError> {
        if max == 0 {
            return Err(ConfigError::InvalidRateLimit(max));
        }
        if window.is_zero() {
            return Err(ConfigError::InvalidRateWindow);
        }
        Ok(Self {
            max: max as usize,
            window,
            grants: Mutex::new(VecDeque::with_capacity(max as usize)),
        })
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Block until a slot is free, then record and return the grant instant.
    pub fn acquire(&self) -> Instant {
        loop {
            let wait = {
                let mut grants = self.lock();
                let now = Instant::now();
                self.prune(&mut grants, now);

                if grants.len() < self.max {
                    grants.push_back(now);
                    return now;
                }

                match grants.front() {
                    Some(&oldest) => self.window.saturating_sub(now.duration_since(oldest)),
                    None => Duration::ZERO,
                }
            };

            if !wait.is_zero() {
                tracing::trace!(wait_ms = wait.as_millis() as u64, "rate limit reached, waiting");
                thread::sleep(wait);
            }
        }
    }

    /// Grants still inside the trailing window.
    pub fn in_window(&self) -> usize {
        let mut grants = self.lock();
        self.prune(&mut grants, Instant::now());
        grants.len()
    }

    fn prune(&self, grants: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&oldest) = grants.front() {
            if now.duration_since(oldest) >= self.window {
                grants.pop_front();
            } else {
                break;
            }
        }
    }

    // The deque is only ever pushed/popped whole, so a poisoned guard is still consistent.
    fn lock(&self) -> MutexGuard<'_, VecDeque<Instant>> {
        self.grants.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
