use parking_lot::Mutex;
use tracing::info;

/// Shared push-rate state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateWindow {
    pub window_start_ms: i64,
    pub requests_in_window: u32,
    /// Backend-imposed cool-down end; 0 when none was ever imposed
    pub next_allowed_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub retry_after_ms: Option<u64>,
}

impl RateDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            retry_after_ms: None,
        }
    }

    fn deny(retry_after_ms: i64) -> Self {
        Self {
            allowed: false,
            retry_after_ms: Some(retry_after_ms.max(0) as u64),
        }
    }
}

/// Fixed-quota window limiter with an externally imposed cool-down.
///
/// The cool-down always dominates the local quota.
pub struct RateLimiter {
    quota: u32,
    window_ms: i64,
    state: Mutex<RateWindow>,
}

impl RateLimiter {
    pub fn new(quota: u32, window_ms: u64) -> Self {
        Self {
            quota: quota.max(1),
            window_ms: window_ms.max(1) as i64,
            state: Mutex::new(RateWindow::default()),
        }
    }

    /// Takes a slot if one is free. A denial leaves the state untouched.
    pub fn try_acquire(&self, now_ms: i64) -> RateDecision {
        let mut state = self.state.lock();

        if now_ms < state.next_allowed_ms {
            return RateDecision::deny(state.next_allowed_ms - now_ms);
        }

        let window_expired = now_ms - state.window_start_ms >= self.window_ms;
        if !window_expired && state.requests_in_window >= self.quota {
            return RateDecision::deny(state.window_start_ms + self.window_ms - now_ms);
        }

        if window_expired {
            state.window_start_ms = now_ms;
            state.requests_in_window = 0;
        }
        state.requests_in_window += 1;
        RateDecision::allow()
    }

    /// Blocks acquisition until `until_ms`. Never shortens an active cool-down.
    pub fn impose_cooldown(&self, until_ms: i64) {
        let mut state = self.state.lock();
        if until_ms > state.next_allowed_ms {
            info!("RateLimiter: Backend cool-down until {}", until_ms);
            state.next_allowed_ms = until_ms;
        }
    }

    pub fn window(&self) -> RateWindow {
        *self.state.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_boundary() {
        let limiter = RateLimiter::new(2, 1_000);
        let start = 10_000;

        assert!(limiter.try_acquire(start).allowed);
        assert!(limiter.try_acquire(start + 10).allowed);

        let third = limiter.try_acquire(start + 20);
        assert!(!third.allowed);
        assert_eq!(third.retry_after_ms, Some(980));

        assert!(limiter.try_acquire(start + 1_000).allowed);
    }

    #[test]
    fn test_denial_has_no_side_effects() {
        let limiter = RateLimiter::new(1, 1_000);
        assert!(limiter.try_acquire(0).allowed);
        let before = limiter.window();

        assert!(!limiter.try_acquire(500).allowed);
        assert_eq!(limiter.window(), before);
    }

    #[test]
    fn test_cooldown_dominates_quota() {
        let limiter = RateLimiter::new(60, 60_000);
        let now = 100_000;
        limiter.impose_cooldown(now + 30_000);

        let decision = limiter.try_acquire(now + 1_000);
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after_ms, Some(29_000));
        assert!(!limiter.try_acquire(now + 29_999).allowed);
        assert!(limiter.try_acquire(now + 31_000).allowed);
    }

    #[test]
    fn test_cooldown_never_shortened() {
        let limiter = RateLimiter::new(5, 1_000);
        limiter.impose_cooldown(50_000);
        limiter.impose_cooldown(20_000);
        assert_eq!(limiter.window().next_allowed_ms, 50_000);
    }
}
