//! Bounded exponential backoff with jitter.
//!
//! The retry loop carries its state as plain values — attempt index, next
//! delay, remaining deadline, attempt records — with no callbacks and no
//! hidden mutable state.

use codeflow_core::AttemptRecord;
use rand::Rng;
use std::time::Duration;

/// HTTP status codes worth retrying.
pub const RETRYABLE_STATUS: &[u16] = &[408, 429, 500, 502, 503, 504];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
            multiplier: 2.0,
        }
    }
}

/// Explicit retry-loop state.
#[derive(Debug)]
pub struct RetryState {
    pub attempt_index: u32,
    pub next_delay: Duration,
    pub remaining_deadline: Duration,
    pub attempts: Vec<AttemptRecord>,
}

impl RetryState {
    pub fn new(policy: &RetryPolicy, deadline_budget: Duration) -> Self {
        Self {
            attempt_index: 0,
            next_delay: backoff_delay(policy, 0),
            remaining_deadline: deadline_budget,
            attempts: Vec::new(),
        }
    }

    /// Advance to the next attempt, recomputing the jittered delay.
    pub fn advance(&mut self, policy: &RetryPolicy, remaining: Duration) {
        self.attempt_index += 1;
        self.next_delay = backoff_delay(policy, self.attempt_index);
        self.remaining_deadline = remaining;
    }
}

/// Delay before retry `k` (0-indexed):
/// `min(initial · multiplier^k, max) · (1 + U(−0.25, +0.25))`.
pub fn backoff_delay(policy: &RetryPolicy, k: u32) -> Duration {
    let base = (policy.initial_delay_ms as f64) * policy.multiplier.powi(k as i32);
    let capped = base.min(policy.max_delay_ms as f64);
    let jitter: f64 = rand::thread_rng().gen_range(-0.25..=0.25);
    Duration::from_millis((capped * (1.0 + jitter)).max(0.0) as u64)
}

pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUS.contains(&status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_follow_exponential_curve_within_jitter() {
        let policy = RetryPolicy::default();
        for (k, base) in [(0u32, 1_000f64), (1, 2_000.0), (2, 4_000.0), (3, 8_000.0)] {
            for _ in 0..20 {
                let d = backoff_delay(&policy, k).as_millis() as f64;
                assert!(d >= base * 0.75 - 1.0, "k={} d={}", k, d);
                assert!(d <= base * 1.25 + 1.0, "k={} d={}", k, d);
            }
        }
    }

    #[test]
    fn delay_caps_at_max() {
        let policy = RetryPolicy::default();
        for _ in 0..20 {
            let d = backoff_delay(&policy, 10).as_millis() as f64;
            assert!(d <= 10_000.0 * 1.25 + 1.0);
            assert!(d >= 10_000.0 * 0.75 - 1.0);
        }
    }

    #[test]
    fn retryable_status_set() {
        for s in [408, 429, 500, 502, 503, 504] {
            assert!(is_retryable_status(s), "{}", s);
        }
        for s in [200, 201, 301, 400, 401, 403, 404, 422, 501] {
            assert!(!is_retryable_status(s), "{}", s);
        }
    }

    #[test]
    fn state_advances_explicitly() {
        let policy = RetryPolicy {
            initial_delay_ms: 100,
            ..RetryPolicy::default()
        };
        let mut state = RetryState::new(&policy, Duration::from_secs(10));
        assert_eq!(state.attempt_index, 0);
        state.advance(&policy, Duration::from_secs(9));
        assert_eq!(state.attempt_index, 1);
        assert!(state.next_delay.as_millis() >= 150);
        assert_eq!(state.remaining_deadline, Duration::from_secs(9));
    }
}
