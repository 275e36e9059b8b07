//! Fixed-window rate limiting keyed by message origin.
//!
//! A window starts on the first message from an origin and never slides;
//! once `max_requests` are counted the remainder of the window is denied
//! with the time left until the window resets. Limiter state lives in
//! process memory only, so a restart clears all windows.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use dashmap::{DashMap, mapref::entry::Entry};

const CLEANUP_EVERY_CHECKS: u64 = 512;

#[derive(Debug, Clone, Copy)]
struct WindowState {
    started_at: Instant,
    count: usize,
}

/// Outcome of one limiter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied { retry_after: Duration },
}

#[derive(Clone)]
pub struct FixedWindowLimiter {
    max_requests: usize,
    window: Duration,
    windows: Arc<DashMap<String, WindowState>>,
    checks_seen: Arc<AtomicU64>,
}

impl FixedWindowLimiter {
    #[must_use]
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: Arc::new(DashMap::new()),
            checks_seen: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn check(&self, key: &str) -> Decision {
        self.check_at(key, Instant::now())
    }

    /// Check with an injected clock. Tests drive window expiry through
    /// this without sleeping.
    pub fn check_at(&self, key: &str, now: Instant) -> Decision {
        if self.max_requests == 0 {
            return Decision::Denied {
                retry_after: self.window.max(Duration::from_secs(1)),
            };
        }

        let decision = match self.windows.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let state = occupied.get_mut();
                let elapsed = now.duration_since(state.started_at);
                if elapsed >= self.window {
                    state.started_at = now;
                    state.count = 1;
                    Decision::Allowed
                } else if state.count < self.max_requests {
                    state.count += 1;
                    Decision::Allowed
                } else {
                    Decision::Denied {
                        retry_after: self.window.saturating_sub(elapsed),
                    }
                }
            },
            Entry::Vacant(vacant) => {
                vacant.insert(WindowState {
                    started_at: now,
                    count: 1,
                });
                Decision::Allowed
            },
        };

        self.cleanup_if_needed(now);
        decision
    }

    /// Drop buckets whose window ended long ago so one-off origins do not
    /// accumulate forever. Amortized across checks.
    fn cleanup_if_needed(&self, now: Instant) {
        let seen = self.checks_seen.fetch_add(1, Ordering::Relaxed) + 1;
        if !seen.is_multiple_of(CLEANUP_EVERY_CHECKS) {
            return;
        }
        let stale_after = self.window.saturating_mul(3);
        self.windows
            .retain(|_, state| now.duration_since(state.started_at) <= stale_after);
    }

    #[cfg(test)]
    fn bucket_count(&self) -> usize {
        self.windows.len()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_denies() {
        let limiter = FixedWindowLimiter::new(3, Duration::from_secs(60));
        let now = Instant::now();
        for _ in 0..3 {
            assert_eq!(limiter.check_at("conn-1", now), Decision::Allowed);
        }
        assert!(matches!(
            limiter.check_at("conn-1", now),
            Decision::Denied { .. }
        ));
    }

    #[test]
    fn denial_reports_time_left_in_window() {
        let limiter = FixedWindowLimiter::new(1, Duration::from_secs(60));
        let start = Instant::now();
        assert_eq!(limiter.check_at("conn-1", start), Decision::Allowed);

        let later = start + Duration::from_secs(40);
        match limiter.check_at("conn-1", later) {
            Decision::Denied { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(20));
            },
            Decision::Allowed => panic!("expected denial inside the window"),
        }
    }

    #[test]
    fn window_resets_after_expiry() {
        let limiter = FixedWindowLimiter::new(1, Duration::from_secs(60));
        let start = Instant::now();
        assert_eq!(limiter.check_at("conn-1", start), Decision::Allowed);
        assert!(matches!(
            limiter.check_at("conn-1", start),
            Decision::Denied { .. }
        ));

        let after_window = start + Duration::from_secs(61);
        assert_eq!(limiter.check_at("conn-1", after_window), Decision::Allowed);
    }

    #[test]
    fn origins_are_tracked_independently() {
        let limiter = FixedWindowLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();
        assert_eq!(limiter.check_at("conn-1", now), Decision::Allowed);
        assert_eq!(limiter.check_at("conn-2", now), Decision::Allowed);
        assert!(matches!(
            limiter.check_at("conn-1", now),
            Decision::Denied { .. }
        ));
    }

    #[test]
    fn zero_limit_denies_everything() {
        let limiter = FixedWindowLimiter::new(0, Duration::from_secs(60));
        assert!(matches!(
            limiter.check_at("conn-1", Instant::now()),
            Decision::Denied { .. }
        ));
    }

    #[test]
    fn stale_buckets_are_swept() {
        let limiter = FixedWindowLimiter::new(10, Duration::from_secs(1));
        let start = Instant::now();
        limiter.check_at("old-origin", start);
        assert_eq!(limiter.bucket_count(), 1);

        // Enough checks from a fresh origin to trip the amortized sweep,
        // at a time well past the old bucket's staleness horizon.
        let much_later = start + Duration::from_secs(10);
        for _ in 0..CLEANUP_EVERY_CHECKS {
            limiter.check_at("new-origin", much_later);
        }
        assert!(limiter.bucket_count() <= 1);
    }
}
