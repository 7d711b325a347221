//! Sliding-window call limit for one backend.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Admits at most `calls` requests in any window of `period`. Callers over
/// the limit wait, in arrival order, until the oldest call leaves the window.
pub struct RateLimiter {
    calls: usize,
    period: Duration,
    sent: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// A limiter admitting `calls` per `period`. `calls` is raised to 1.
    pub fn new(calls: u32, period: Duration) -> Self {
        let calls = (calls as usize).max(1);
        Self {
            calls,
            period,
            sent: Mutex::new(VecDeque::with_capacity(calls)),
        }
    }

    /// Waits for a free slot in the window and claims it. Returns how long
    /// the caller waited.
    pub async fn acquire(&self) -> Duration {
        let mut sent = self.sent.lock().await;
        let arrived = Instant::now();
        while sent
            .front()
            .is_some_and(|at| arrived.duration_since(*at) >= self.period)
        {
            sent.pop_front();
        }

        if sent.len() >= self.calls {
            if let Some(oldest) = sent.pop_front() {
                tokio::time::sleep_until(oldest + self.period).await;
            }
        }
        let admitted = Instant::now();
        sent.push_back(admitted);
        admitted.duration_since(arrived)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn calls_within_the_limit_pass_straight_through() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            assert!(limiter.acquire().await < Duration::from_millis(20));
        }
    }

    #[tokio::test]
    async fn call_over_the_limit_waits_for_the_window() {
        let limiter = RateLimiter::new(2, Duration::from_millis(100));
        let started = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;

        let waited = limiter.acquire().await;

        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(waited > Duration::from_millis(50), "waited {waited:?}");
    }

    #[test]
    fn zero_calls_is_treated_as_one() {
        assert_eq!(RateLimiter::new(0, Duration::from_secs(1)).calls, 1);
    }
}
