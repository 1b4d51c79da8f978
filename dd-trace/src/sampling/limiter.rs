//! A token-bucket rate limiter bounding how many traces/spans per second a
//! sampler may keep, grounded on `original_source/src/datadog/rate_limiter.h`.
//! Tracks an effective rate (an exponential moving average of the
//! allowed/total ratio across 1-second windows) so that a trace kept by the
//! limiter can be tagged with the rate that was actually being applied.

use std::sync::Mutex;

use crate::clock::{Clock, SystemClock, TimePoint};

struct State {
    tokens: f64,
    last_refill: TimePoint,
    current_window_start: TimePoint,
    allowed_in_window: u64,
    total_in_window: u64,
    effective_rate: f64,
}

/// A thread-safe token-bucket limiter. `max_per_second` doubles as both the
/// refill rate and the bucket capacity, matching the C++ original's
/// single-parameter `RateLimiter`.
pub struct Limiter {
    max_per_second: f64,
    clock: std::sync::Arc<dyn Clock>,
    state: Mutex<State>,
}

impl Limiter {
    pub fn new(max_per_second: f64) -> Self {
        Self::with_clock(max_per_second, std::sync::Arc::new(SystemClock))
    }

    pub fn with_clock(max_per_second: f64, clock: std::sync::Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Limiter {
            max_per_second,
            clock,
            state: Mutex::new(State {
                tokens: max_per_second,
                last_refill: now,
                current_window_start: now,
                allowed_in_window: 0,
                total_in_window: 0,
                effective_rate: 1.0,
            }),
        }
    }

    /// Consults and updates the bucket, returning whether this call is
    /// allowed. `max_per_second <= 0.0` always refuses; this is how callers
    /// represent "no limiting" by simply not consulting a limiter at all.
    pub fn allow(&self) -> bool {
        if self.max_per_second <= 0.0 {
            return false;
        }
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap();

        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.max_per_second).min(self.max_per_second);
        state.last_refill = now;

        if now.duration_since(state.current_window_start) >= std::time::Duration::from_secs(1) {
            if state.total_in_window > 0 {
                let window_rate = state.allowed_in_window as f64 / state.total_in_window as f64;
                // Exponential moving average, matching the smoothing
                // coefficient used for the agent's own rate-by-service
                // feedback so a freshly-started limiter converges quickly.
                state.effective_rate = 0.4 * window_rate + 0.6 * state.effective_rate;
            }
            state.current_window_start = now;
            state.allowed_in_window = 0;
            state.total_in_window = 0;
        }

        state.total_in_window += 1;
        let allowed = state.tokens >= 1.0;
        if allowed {
            state.tokens -= 1.0;
            state.allowed_in_window += 1;
        }
        allowed
    }

    /// The limiter's estimate of the fraction of calls it is currently
    /// letting through, for tagging onto a kept trace/span.
    pub fn effective_rate(&self) -> f64 {
        self.state.lock().unwrap().effective_rate
    }

    /// The configured ceiling this limiter enforces, for tagging onto a
    /// kept trace/span alongside `effective_rate`.
    pub fn max_per_second(&self) -> f64 {
        self.max_per_second
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_capacity_then_refuses() {
        let limiter = Limiter::new(3.0);
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }

    #[test]
    fn non_positive_rate_always_refuses() {
        let limiter = Limiter::new(0.0);
        assert!(!limiter.allow());
    }
}
