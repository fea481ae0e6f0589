//! Per-origin request limiting with a sliding window log.
//!
//! Each key keeps the instants of its admitted requests inside the window.
//! Updates go through the map's entry API so concurrent requests for one key
//! serialize on its shard. Expired keys are swept opportunistically every
//! [`PRUNE_EVERY`] calls; there is no background task.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const PRUNE_EVERY: u64 = 256;

/// Decides whether one more request from `key` may proceed.
pub trait RateLimiter: Send + Sync {
    fn admit(&self, key: &str) -> bool;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

impl<C: Clock> Clock for std::sync::Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

pub struct SlidingWindowLimiter<C: Clock = SystemClock> {
    max_requests: usize,
    window: Duration,
    logs: DashMap<String, VecDeque<Instant>>,
    clock: C,
    calls: AtomicU64,
}

impl SlidingWindowLimiter<SystemClock> {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self::with_clock(max_requests, window, SystemClock)
    }
}

impl<C: Clock> SlidingWindowLimiter<C> {
    pub fn with_clock(max_requests: usize, window: Duration, clock: C) -> Self {
        Self {
            max_requests,
            window,
            logs: DashMap::new(),
            clock,
            calls: AtomicU64::new(0),
        }
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.logs.len()
    }

    fn prune(&self, now: Instant) {
        let window = self.window;
        self.logs.retain(|_, log| {
            log.back()
                .is_some_and(|last| now.saturating_duration_since(*last) < window)
        });
    }
}

impl<C: Clock> RateLimiter for SlidingWindowLimiter<C> {
    fn admit(&self, key: &str) -> bool {
        let now = self.clock.now();

        let admitted = {
            let mut log = self.logs.entry(key.to_string()).or_default();
            while let Some(front) = log.front() {
                if now.saturating_duration_since(*front) >= self.window {
                    log.pop_front();
                } else {
                    break;
                }
            }
            if log.len() < self.max_requests {
                log.push_back(now);
                true
            } else {
                false
            }
        };

        if self.calls.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            self.prune(now);
        }

        if !admitted {
            metrics::counter!("admission.rate_limited").increment(1);
        }
        admitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn limiter(clock: Arc<ManualClock>) -> SlidingWindowLimiter<Arc<ManualClock>> {
        SlidingWindowLimiter::with_clock(10, Duration::from_secs(900), clock)
    }

    #[test]
    fn test_eleventh_request_is_limited_per_origin() {
        let clock = Arc::new(ManualClock::new());
        let limiter = limiter(clock);
        for i in 0..10 {
            assert!(limiter.admit("10.0.0.1"), "request {i}");
        }
        assert!(!limiter.admit("10.0.0.1"));
        assert!(limiter.admit("10.0.0.2"));
    }

    #[test]
    fn test_window_slides() {
        let clock = Arc::new(ManualClock::new());
        let limiter = limiter(clock.clone());
        for _ in 0..5 {
            assert!(limiter.admit("o"));
        }
        clock.advance(Duration::from_secs(600));
        for _ in 0..5 {
            assert!(limiter.admit("o"));
        }
        assert!(!limiter.admit("o"));

        // The first five fall out of the window; the later five remain.
        clock.advance(Duration::from_secs(300));
        for _ in 0..5 {
            assert!(limiter.admit("o"));
        }
        assert!(!limiter.admit("o"));
    }

    #[test]
    fn test_expired_keys_are_pruned() {
        let clock = Arc::new(ManualClock::new());
        let limiter = limiter(clock.clone());
        for i in 0..100 {
            limiter.admit(&format!("origin-{i}"));
        }
        assert_eq!(limiter.tracked_keys(), 100);

        clock.advance(Duration::from_secs(901));
        for _ in 0..PRUNE_EVERY {
            limiter.admit("fresh");
        }
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn test_concurrent_admissions_do_not_overcount() {
        let limiter = Arc::new(SlidingWindowLimiter::new(50, Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || (0..20).filter(|_| limiter.admit("shared")).count())
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 50);
    }
}
