use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};

/// Sliding-window request limiter: never more than `max_requests` grants in any
/// trailing `window`.
///
/// It remembers the grant times of the last `max_requests` requests. Once the
/// history is full, a new request has to wait until the oldest grant has aged out
/// of the window. Callers are expected to use it from one sequential flow, grants
/// come out in call order.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    history: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        let max_requests = max_requests.max(1);
        Self {
            max_requests,
            window,
            history: VecDeque::with_capacity(max_requests),
        }
    }

    /// Waits until one more request fits in the window, then records it.
    pub async fn acquire(&mut self) {
        let grant_at = self.reserve(Instant::now());
        if grant_at > Instant::now() {
            tracing::debug!(
                wait_secs = (grant_at - Instant::now()).as_secs_f64(),
                "request quota used up, waiting"
            );
        }
        sleep_until(grant_at).await;
    }

    /// Books the next grant for a request arriving at `now` and returns the instant
    /// it may be issued.
    pub(crate) fn reserve(&mut self, now: Instant) -> Instant {
        let grant_at = if self.history.len() < self.max_requests {
            now
        } else {
            // Full history, so front is the oldest of the last `max_requests` grants.
            let oldest = self.history[0];
            now.max(oldest + self.window)
        };
        if self.history.len() == self.max_requests {
            self.history.pop_front();
        }
        self.history.push_back(grant_at);
        grant_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test(start_paused = true)]
    async fn sixth_request_waits_out_the_window() {
        let mut limiter = RateLimiter::new(5, Duration::from_secs(30));
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_secs(1));

        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn no_wait_when_requests_are_spread_out() {
        let mut limiter = RateLimiter::new(2, Duration::from_secs(10));
        limiter.acquire().await;
        tokio::time::sleep(Duration::from_secs(6)).await;
        limiter.acquire().await;
        tokio::time::sleep(Duration::from_secs(6)).await;

        let before = Instant::now();
        limiter.acquire().await;
        assert_eq!(Instant::now(), before);
    }

    #[test]
    fn partial_wait_only_covers_the_remaining_window() {
        let base = Instant::now();
        let mut limiter = RateLimiter::new(1, Duration::from_secs(30));
        assert_eq!(limiter.reserve(base), base);
        let late = base + Duration::from_secs(20);
        assert_eq!(limiter.reserve(late), base + Duration::from_secs(30));
    }

    proptest! {
        #[test]
        fn no_window_ever_exceeds_the_quota(
            max_requests in 1usize..6,
            window_secs in 1u64..60,
            gaps in proptest::collection::vec(0u64..40_000, 1..60),
        ) {
            let window = Duration::from_secs(window_secs);
            let mut limiter = RateLimiter::new(max_requests, window);
            let base = Instant::now();

            // A sequential caller can't ask again before its previous grant.
            let mut clock = base;
            let mut grants = Vec::with_capacity(gaps.len());
            for gap_ms in gaps {
                let arrival = clock + Duration::from_millis(gap_ms);
                let granted = limiter.reserve(arrival);
                prop_assert!(granted >= arrival);
                grants.push(granted);
                clock = granted;
            }

            for (i, start) in grants.iter().enumerate() {
                let in_window = grants[i..]
                    .iter()
                    .take_while(|at| **at < *start + window)
                    .count();
                prop_assert!(in_window <= max_requests);
            }
        }
    }
}
