//! Sliding-window auth failure tracking and lockout.
//!
//! Same sliding-window-plus-`DashMap` shape as [`crate::rate_limit`], applied
//! to failure counts instead of token consumption.

use std::time::{Duration, Instant};

use dashmap::DashMap;

struct FailureWindow {
    failures: Vec<Instant>,
    locked_until: Option<Instant>,
}

/// Tracks authentication failures per client and locks a client out after
/// too many within a rolling window.
pub struct AuthLimiter {
    windows: DashMap<String, FailureWindow>,
    max_attempts: usize,
    window: Duration,
    lockout: Duration,
}

impl AuthLimiter {
    pub fn new(max_attempts: usize, window_seconds: u64, lockout_seconds: u64) -> Self {
        Self {
            windows: DashMap::new(),
            max_attempts,
            window: Duration::from_secs(window_seconds),
            lockout: Duration::from_secs(lockout_seconds),
        }
    }

    /// Returns `Some(remaining_seconds)` if `client_id` is currently locked
    /// out, `None` if it may proceed. An expired lockout is cleared rather
    /// than left behind, so the client's next failure starts a fresh window
    /// instead of accumulating against stale history.
    pub fn check(&self, client_id: &str) -> Option<u64> {
        let now = Instant::now();
        let locked_until = self.windows.get(client_id)?.locked_until?;
        if now < locked_until {
            return Some((locked_until - now).as_secs().max(1));
        }
        self.windows.remove(client_id);
        None
    }

    /// Record an authentication failure, locking the client out if this
    /// pushes the rolling count at or past `max_attempts`. Returns whether
    /// this failure just triggered the lockout, and how many attempts
    /// remain in the window before it would.
    pub fn record_failure(&self, client_id: &str) -> (bool, usize) {
        let now = Instant::now();
        let mut entry = self
            .windows
            .entry(client_id.to_string())
            .or_insert_with(|| FailureWindow {
                failures: Vec::new(),
                locked_until: None,
            });

        let window = self.window;
        entry.failures.retain(|&t| now.duration_since(t) < window);
        entry.failures.push(now);

        let now_locked = entry.failures.len() >= self.max_attempts;
        if now_locked {
            entry.locked_until = Some(now + self.lockout);
        }
        let attempts_left = self.max_attempts.saturating_sub(entry.failures.len());
        (now_locked, attempts_left)
    }

    /// Clear a client's failure history, e.g. on a successful auth.
    pub fn record_success(&self, client_id: &str) {
        self.windows.remove(client_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locks_out_after_max_attempts() {
        let limiter = AuthLimiter::new(3, 60, 30);
        assert!(limiter.check("c").is_none());
        limiter.record_failure("c");
        limiter.record_failure("c");
        assert!(limiter.check("c").is_none());
        limiter.record_failure("c");
        assert!(limiter.check("c").is_some());
    }

    #[test]
    fn success_clears_history() {
        let limiter = AuthLimiter::new(2, 60, 30);
        limiter.record_failure("c");
        limiter.record_success("c");
        limiter.record_failure("c");
        assert!(limiter.check("c").is_none());
    }

    #[test]
    fn failures_outside_window_do_not_accumulate() {
        let limiter = AuthLimiter::new(2, 0, 30);
        limiter.record_failure("c");
        std::thread::sleep(Duration::from_millis(5));
        limiter.record_failure("c");
        // window_seconds=0 means every prior failure is immediately stale,
        // so the rolling count never reaches max_attempts.
        assert!(limiter.check("c").is_none());
    }

    #[test]
    fn distinct_clients_are_independent() {
        let limiter = AuthLimiter::new(1, 60, 30);
        limiter.record_failure("a");
        assert!(limiter.check("a").is_some());
        assert!(limiter.check("b").is_none());
    }

    #[test]
    fn record_failure_reports_attempts_left_and_lockout_transition() {
        let limiter = AuthLimiter::new(3, 60, 30);
        assert_eq!(limiter.record_failure("c"), (false, 2));
        assert_eq!(limiter.record_failure("c"), (false, 1));
        assert_eq!(limiter.record_failure("c"), (true, 0));
    }

    #[test]
    fn check_clears_an_expired_lockout() {
        let limiter = AuthLimiter::new(1, 60, 0);
        limiter.record_failure("c");
        assert!(limiter.check("c").is_none());
        // the lockout already expired (0s), so the entry should have been
        // removed rather than left behind with stale failure history.
        assert_eq!(limiter.record_failure("c"), (true, 0));
    }
}
