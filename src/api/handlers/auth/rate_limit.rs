//! Rate limiting primitives for auth flows.
//!
//! Sensitive endpoints (password reset requests, OTP code requests) are
//! limited per (action, client key) with a fixed window per bucket. Blocked
//! calls do not increment the counter, so the window expires on schedule.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateLimitAction {
    PasswordResetRequest,
    OtpRequest,
}

impl RateLimitAction {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::PasswordResetRequest => "password_reset_request",
            Self::OtpRequest => "otp_request",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

pub trait RateLimiter: Send + Sync {
    /// Count an attempt for (action, key) and decide whether it may proceed.
    fn check_and_increment(&self, action: RateLimitAction, key: &str) -> RateLimitDecision;
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check_and_increment(&self, _action: RateLimitAction, _key: &str) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }
}

#[derive(Debug)]
struct Bucket {
    window_start: Instant,
    count: u32,
}

/// In-process fixed-window limiter.
///
/// Buckets are keyed by (action, client key); the counter resets when the
/// window elapses and stale buckets are pruned on access. Increments are
/// atomic under the bucket map lock, so concurrent bursts from the same key
/// cannot undercount.
#[derive(Debug)]
pub struct FixedWindowRateLimiter {
    limit: u32,
    window: Duration,
    buckets: Mutex<HashMap<(RateLimitAction, String), Bucket>>,
}

impl FixedWindowRateLimiter {
    #[must_use]
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window,
            buckets: Mutex::new(HashMap::new()),
        }
    }
}

impl RateLimiter for FixedWindowRateLimiter {
    fn check_and_increment(&self, action: RateLimitAction, key: &str) -> RateLimitDecision {
        let Ok(mut buckets) = self.buckets.lock() else {
            // A poisoned lock means a panic elsewhere; fail open and log.
            warn!(action = action.as_str(), "rate limit bucket lock poisoned");
            return RateLimitDecision::Allowed;
        };

        buckets.retain(|_, bucket| bucket.window_start.elapsed() < self.window);

        let bucket = buckets
            .entry((action, key.to_string()))
            .or_insert_with(|| Bucket {
                window_start: Instant::now(),
                count: 0,
            });

        if bucket.window_start.elapsed() >= self.window {
            bucket.window_start = Instant::now();
            bucket.count = 0;
        }

        if bucket.count >= self.limit {
            return RateLimitDecision::Limited;
        }

        bucket.count += 1;
        RateLimitDecision::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn noop_rate_limiter_allows() {
        let limiter = NoopRateLimiter;
        assert_eq!(
            limiter.check_and_increment(RateLimitAction::PasswordResetRequest, "1.2.3.4"),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn fixed_window_blocks_after_limit() {
        let limiter = FixedWindowRateLimiter::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            assert_eq!(
                limiter.check_and_increment(RateLimitAction::PasswordResetRequest, "1.2.3.4"),
                RateLimitDecision::Allowed
            );
        }
        assert_eq!(
            limiter.check_and_increment(RateLimitAction::PasswordResetRequest, "1.2.3.4"),
            RateLimitDecision::Limited
        );
    }

    #[test]
    fn fixed_window_keys_are_independent() {
        let limiter = FixedWindowRateLimiter::new(1, Duration::from_secs(60));
        assert_eq!(
            limiter.check_and_increment(RateLimitAction::PasswordResetRequest, "1.1.1.1"),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_and_increment(RateLimitAction::PasswordResetRequest, "2.2.2.2"),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_and_increment(RateLimitAction::PasswordResetRequest, "1.1.1.1"),
            RateLimitDecision::Limited
        );
    }

    #[test]
    fn actions_do_not_share_buckets() {
        let limiter = FixedWindowRateLimiter::new(1, Duration::from_secs(60));
        assert_eq!(
            limiter.check_and_increment(RateLimitAction::PasswordResetRequest, "1.2.3.4"),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_and_increment(RateLimitAction::OtpRequest, "1.2.3.4"),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn window_rollover_resets_count() {
        let limiter = FixedWindowRateLimiter::new(2, Duration::from_millis(40));
        assert_eq!(
            limiter.check_and_increment(RateLimitAction::PasswordResetRequest, "key"),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_and_increment(RateLimitAction::PasswordResetRequest, "key"),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_and_increment(RateLimitAction::PasswordResetRequest, "key"),
            RateLimitDecision::Limited
        );

        std::thread::sleep(Duration::from_millis(60));

        assert_eq!(
            limiter.check_and_increment(RateLimitAction::PasswordResetRequest, "key"),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn blocked_calls_do_not_extend_the_window() {
        let limiter = FixedWindowRateLimiter::new(1, Duration::from_millis(40));
        assert_eq!(
            limiter.check_and_increment(RateLimitAction::PasswordResetRequest, "key"),
            RateLimitDecision::Allowed
        );

        // Hammering while blocked must not reset the window start.
        for _ in 0..5 {
            assert_eq!(
                limiter.check_and_increment(RateLimitAction::PasswordResetRequest, "key"),
                RateLimitDecision::Limited
            );
            std::thread::sleep(Duration::from_millis(5));
        }

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(
            limiter.check_and_increment(RateLimitAction::PasswordResetRequest, "key"),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn concurrent_bursts_do_not_undercount() {
        let limiter = Arc::new(FixedWindowRateLimiter::new(3, Duration::from_secs(60)));
        let allowed = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                let allowed = Arc::clone(&allowed);
                std::thread::spawn(move || {
                    if limiter.check_and_increment(RateLimitAction::PasswordResetRequest, "burst")
                        == RateLimitDecision::Allowed
                    {
                        allowed.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            let _ = handle.join();
        }

        assert_eq!(allowed.load(Ordering::SeqCst), 3);
    }
}
