// In-memory rate limiter for per-player session actions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Session actions with their own rate windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitAction {
    /// Competitive submissions.
    SubmitCode,
    /// Non-competitive test runs.
    TestSubmitCode,
}

impl RateLimitAction {
    /// Maximum number of events allowed in the window.
    pub fn max_count(&self) -> usize {
        match self {
            RateLimitAction::SubmitCode => 1,
            RateLimitAction::TestSubmitCode => 2,
        }
    }

    /// Time window for the rate limit.
    pub fn window(&self) -> Duration {
        match self {
            RateLimitAction::SubmitCode => Duration::from_secs(2),
            RateLimitAction::TestSubmitCode => Duration::from_secs(2),
        }
    }

    /// Wire label used in `rate_limit {action}` frames.
    pub fn label(&self) -> &'static str {
        match self {
            RateLimitAction::SubmitCode => "submit_code",
            RateLimitAction::TestSubmitCode => "test_submit_code",
        }
    }
}

/// Key for the rate limit map: (user_id, action).
type LimitKey = (String, RateLimitAction);

/// Thread-safe in-memory rate limiter.
#[derive(Debug, Clone, Default)]
pub struct RateLimiter {
    inner: Arc<Mutex<HashMap<LimitKey, Vec<Instant>>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check and record one event for the user. Returns false when the user
    /// is over the limit; the caller answers with a `rate_limit` frame
    /// instead of a silent drop.
    pub fn allow(&self, user_id: &str, action: RateLimitAction) -> bool {
        let mut map = self.inner.lock().unwrap();
        let key = (user_id.to_string(), action);
        let window = action.window();
        let max = action.max_count();
        let now = Instant::now();

        let entries = map.entry(key).or_default();
        entries.retain(|t| now.duration_since(*t) < window);

        if entries.len() >= max {
            return false;
        }
        entries.push(now);
        true
    }

    /// Current in-window count for a user and action (diagnostics).
    pub fn current_count(&self, user_id: &str, action: RateLimitAction) -> usize {
        let mut map = self.inner.lock().unwrap();
        let key = (user_id.to_string(), action);
        let window = action.window();
        let now = Instant::now();

        if let Some(entries) = map.get_mut(&key) {
            entries.retain(|t| now.duration_since(*t) < window);
            entries.len()
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_allows_one_per_window() {
        let limiter = RateLimiter::new();
        assert!(limiter.allow("u1", RateLimitAction::SubmitCode));
        assert!(!limiter.allow("u1", RateLimitAction::SubmitCode));
    }

    #[test]
    fn test_test_submit_allows_two_per_window() {
        let limiter = RateLimiter::new();
        assert!(limiter.allow("u1", RateLimitAction::TestSubmitCode));
        assert!(limiter.allow("u1", RateLimitAction::TestSubmitCode));
        assert!(!limiter.allow("u1", RateLimitAction::TestSubmitCode));
    }

    #[test]
    fn test_separate_users_and_actions() {
        let limiter = RateLimiter::new();
        assert!(limiter.allow("u1", RateLimitAction::SubmitCode));
        // Different user, same action
        assert!(limiter.allow("u2", RateLimitAction::SubmitCode));
        // Same user, different action
        assert!(limiter.allow("u1", RateLimitAction::TestSubmitCode));
        assert!(!limiter.allow("u1", RateLimitAction::SubmitCode));
    }

    #[test]
    fn test_window_expiry_readmits() {
        let limiter = RateLimiter::new();
        assert!(limiter.allow("u1", RateLimitAction::SubmitCode));
        assert_eq!(limiter.current_count("u1", RateLimitAction::SubmitCode), 1);

        // Backdate the recorded event past the window.
        {
            let mut map = limiter.inner.lock().unwrap();
            let entries = map
                .get_mut(&("u1".to_string(), RateLimitAction::SubmitCode))
                .unwrap();
            entries[0] = Instant::now() - Duration::from_secs(3);
        }

        assert_eq!(limiter.current_count("u1", RateLimitAction::SubmitCode), 0);
        assert!(limiter.allow("u1", RateLimitAction::SubmitCode));
    }

    #[test]
    fn test_action_labels() {
        assert_eq!(RateLimitAction::SubmitCode.label(), "submit_code");
        assert_eq!(RateLimitAction::TestSubmitCode.label(), "test_submit_code");
    }
}
