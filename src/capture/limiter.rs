//! Rolling-window rate limit for captured records.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Length of the rolling window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Allows at most `max` events per rolling [`WINDOW`]. `max == 0` is unlimited.
#[derive(Debug)]
pub struct RateLimiter {
    max: usize,
    recent: VecDeque<Instant>,
}

impl RateLimiter {
    /// Create a limiter allowing `max` events per minute.
    pub fn new(max: u32) -> Self {
        Self {
            max: max as usize,
            recent: VecDeque::new(),
        }
    }

    /// Record an event if the budget allows it.
    pub fn allow(&mut self) -> bool {
        self.allow_at(Instant::now())
    }

    fn allow_at(&mut self, now: Instant) -> bool {
        if self.max == 0 {
            return true;
        }
        while let Some(&oldest) = self.recent.front() {
            if now.duration_since(oldest) >= WINDOW {
                self.recent.pop_front();
            } else {
                break;
            }
        }
        if self.recent.len() >= self.max {
            return false;
        }
        self.recent.push_back(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_exhausts_and_refills() {
        let mut limiter = RateLimiter::new(3);
        let start = Instant::now();

        assert!(limiter.allow_at(start));
        assert!(limiter.allow_at(start + Duration::from_secs(1)));
        assert!(limiter.allow_at(start + Duration::from_secs(2)));
        assert!(!limiter.allow_at(start + Duration::from_secs(3)));

        // First slot frees up exactly one window after it was taken.
        assert!(limiter.allow_at(start + WINDOW));
        assert!(!limiter.allow_at(start + WINDOW));
    }

    #[test]
    fn test_zero_is_unlimited() {
        let mut limiter = RateLimiter::new(0);
        for _ in 0..1000 {
            assert!(limiter.allow());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_clock() {
        let mut limiter = RateLimiter::new(10);
        for _ in 0..10 {
            assert!(limiter.allow());
        }
        assert!(!limiter.allow());

        tokio::time::advance(WINDOW).await;
        assert!(limiter.allow());
    }
}
