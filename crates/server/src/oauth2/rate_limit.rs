//! Rate limiting primitives for token issuance and login.

use dashmap::DashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateLimitAction {
    /// Any grant at the token endpoint, keyed by client id.
    Token,
    /// Login form submissions, keyed by identifier.
    Login,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

pub trait RateLimiter: Send + Sync {
    fn check(&self, key: &str, action: RateLimitAction) -> RateLimitDecision;
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check(&self, _key: &str, _action: RateLimitAction) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }
}

/// Fixed-window counter per (action, key).
///
/// Keys come from unauthenticated input, so windows that have run out are
/// swept at most once per window length.
#[derive(Debug)]
pub struct FixedWindowRateLimiter {
    limit: u32,
    window: Duration,
    windows: DashMap<(RateLimitAction, String), (Instant, u32)>,
    last_sweep: Mutex<Instant>,
}

impl FixedWindowRateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: DashMap::new(),
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Number of (action, key) windows currently tracked.
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }

    fn maybe_sweep(&self, now: Instant) {
        let Ok(mut last_sweep) = self.last_sweep.try_lock() else {
            return;
        };
        if now.duration_since(*last_sweep) < self.window {
            return;
        }
        *last_sweep = now;
        drop(last_sweep);

        let window = self.window;
        self.windows
            .retain(|_, (started, _)| now.duration_since(*started) < window);
    }
}

impl RateLimiter for FixedWindowRateLimiter {
    fn check(&self, key: &str, action: RateLimitAction) -> RateLimitDecision {
        let now = Instant::now();
        self.maybe_sweep(now);
        let mut slot = self
            .windows
            .entry((action, key.to_string()))
            .or_insert((now, 0));
        let (started, count) = &mut *slot;
        if now.duration_since(*started) >= self.window {
            *started = now;
            *count = 0;
        }
        if *count >= self.limit {
            return RateLimitDecision::Limited;
        }
        *count += 1;
        RateLimitDecision::Allowed
    }
}
