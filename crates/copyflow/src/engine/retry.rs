//! Retry and catch policy evaluation.

use copyflow_tasks::RUNTIME;

use crate::machine::{Catcher, Retrier, ALL_ERRORS};

/// Whether an `ErrorEquals` list matches `error`.
///
/// `States.ALL` matches every error except `States.Runtime`.
pub fn matches(error_equals: &[String], error: &str) -> bool {
    error_equals
        .iter()
        .any(|name| name == error || (name == ALL_ERRORS && error != RUNTIME))
}

/// First catcher matching `error`.
pub fn find_catcher<'c>(catchers: &'c [Catcher], error: &str) -> Option<&'c Catcher> {
    catchers.iter().find(|c| matches(&c.error_equals, error))
}

/// Decision after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    /// Try again after `delay_seconds`.
    Retry { delay_seconds: u64, attempt: u32 },
    /// Retries are exhausted or no retrier matches.
    GiveUp,
}

/// Per-state retry bookkeeping.
///
/// Each retrier keeps its own attempt count; the first retrier whose
/// `ErrorEquals` matches decides, even if its attempts are exhausted.
#[derive(Debug, Clone)]
pub struct RetryTracker<'r> {
    retriers: &'r [Retrier],
    attempts: Vec<u32>,
}

impl<'r> RetryTracker<'r> {
    pub fn new(retriers: &'r [Retrier]) -> Self {
        Self {
            retriers,
            attempts: vec![0; retriers.len()],
        }
    }

    /// Total retries granted so far.
    pub fn total_attempts(&self) -> u32 {
        self.attempts.iter().sum()
    }

    pub fn on_error(&mut self, error: &str) -> RetryDecision {
        let Some(index) = self
            .retriers
            .iter()
            .position(|r| matches(&r.error_equals, error))
        else {
            return RetryDecision::GiveUp;
        };

        let retrier = &self.retriers[index];
        let attempt = self.attempts[index];
        if attempt >= retrier.max_attempts {
            return RetryDecision::GiveUp;
        }

        self.attempts[index] += 1;
        RetryDecision::Retry {
            delay_seconds: backoff_delay(retrier, attempt),
            attempt: attempt + 1,
        }
    }
}

/// Delay before retry `attempt` (0-based): `IntervalSeconds * BackoffRate^attempt`.
pub fn backoff_delay(retrier: &Retrier, attempt: u32) -> u64 {
    let delay = retrier.interval_seconds as f64 * retrier.backoff_rate.powi(attempt as i32);
    delay.round() as u64
}
