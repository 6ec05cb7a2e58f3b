//! Retry policy engine: a pure function from outcome to decision.
//!
//! All retry arithmetic lives here. Given an outcome class, the 1-based
//! attempt number, and the attempt ceiling, the policy decides whether the
//! delivery completed, schedules a delayed retry, or fails permanently.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::client::DeliveryOutcome;

/// Retry policy configuration for webhook delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of delivery attempts (including the first).
    pub max_attempts: u32,

    /// Base delay before the first retry; doubles per attempt.
    pub base_delay: Duration,

    /// Ceiling applied to the un-jittered delay.
    pub max_delay: Duration,

    /// Jitter fraction: the delay is drawn uniformly from
    /// `[(1 - f) * base, (1 + f) * base]`.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(300),
            jitter_factor: 0.5,
        }
    }
}

/// Decision for one classified attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// The receiver acknowledged; the record is terminal-delivered.
    CompleteSuccess,
    /// Schedule a delayed retry.
    ScheduleRetry {
        /// How long to wait before the next attempt becomes visible.
        delay: Duration,
    },
    /// Permanent failure; write the dead letter.
    FailPermanent,
}

impl RetryPolicy {
    /// Decides the follow-up for `outcome` observed on attempt
    /// `attempt_number` (1-based).
    pub fn decide(&self, outcome: &DeliveryOutcome, attempt_number: u32) -> RetryDecision {
        match outcome {
            DeliveryOutcome::Success2xx(_) => RetryDecision::CompleteSuccess,

            DeliveryOutcome::InvalidUrl | DeliveryOutcome::Client4xxPermanent(_) => {
                RetryDecision::FailPermanent
            },

            DeliveryOutcome::Client4xxRetriable(_)
            | DeliveryOutcome::Server5xx(_)
            | DeliveryOutcome::Timeout
            | DeliveryOutcome::ConnectionError => {
                if attempt_number >= self.max_attempts {
                    RetryDecision::FailPermanent
                } else {
                    RetryDecision::ScheduleRetry { delay: self.delay_for(attempt_number) }
                }
            },
        }
    }

    /// Delay before the retry that follows attempt `attempt_number`.
    ///
    /// `base = min(cap, base_delay * 2^(attempt_number - 1))`, then jitter
    /// is applied. The cap bounds the base; jitter may land above it.
    pub fn delay_for(&self, attempt_number: u32) -> Duration {
        let exponent = attempt_number.saturating_sub(1).min(20);
        let multiplier = 2_u32.saturating_pow(exponent);
        let base = std::cmp::min(self.base_delay * multiplier, self.max_delay);
        apply_jitter(base, self.jitter_factor)
    }
}

/// Draws a uniformly jittered duration from
/// `[(1 - factor) * base, (1 + factor) * base]`.
fn apply_jitter(base: Duration, factor: f64) -> Duration {
    if factor <= 0.0 {
        return base;
    }

    let factor = factor.clamp(0.0, 1.0);
    let mut rng = rand::rng();
    let scale = rng.random_range((1.0 - factor)..=(1.0 + factor));
    Duration::from_secs_f64(base.as_secs_f64() * scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy { jitter_factor: 0.0, ..Default::default() }
    }

    #[test]
    fn success_always_completes() {
        let policy = RetryPolicy::default();
        for attempt in 1..=5 {
            assert_eq!(
                policy.decide(&DeliveryOutcome::Success2xx(200), attempt),
                RetryDecision::CompleteSuccess
            );
        }
    }

    #[test]
    fn permanent_classes_never_retry() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(&DeliveryOutcome::Client4xxPermanent(404), 1),
            RetryDecision::FailPermanent
        );
        assert_eq!(
            policy.decide(&DeliveryOutcome::InvalidUrl, 1),
            RetryDecision::FailPermanent
        );
    }

    #[test]
    fn retriable_classes_retry_until_attempts_exhausted() {
        let policy = no_jitter();
        for outcome in [
            DeliveryOutcome::Client4xxRetriable(429),
            DeliveryOutcome::Server5xx(503),
            DeliveryOutcome::Timeout,
            DeliveryOutcome::ConnectionError,
        ] {
            assert!(matches!(
                policy.decide(&outcome, 1),
                RetryDecision::ScheduleRetry { .. }
            ));
            assert!(matches!(
                policy.decide(&outcome, 2),
                RetryDecision::ScheduleRetry { .. }
            ));
            assert_eq!(policy.decide(&outcome, 3), RetryDecision::FailPermanent);
        }
    }

    #[test]
    fn delays_double_from_thirty_seconds() {
        let policy = no_jitter();
        assert_eq!(policy.delay_for(1), Duration::from_secs(30));
        assert_eq!(policy.delay_for(2), Duration::from_secs(60));
        assert_eq!(policy.delay_for(3), Duration::from_secs(120));
        assert_eq!(policy.delay_for(4), Duration::from_secs(240));
    }

    #[test]
    fn base_delay_capped_at_five_minutes() {
        let policy = no_jitter();
        assert_eq!(policy.delay_for(5), Duration::from_secs(300));
        assert_eq!(policy.delay_for(12), Duration::from_secs(300));
    }

    #[test]
    fn jitter_stays_within_half_to_three_halves() {
        let policy = RetryPolicy::default();
        for _ in 0..200 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_secs(15), "delay {delay:?} below window");
            assert!(delay <= Duration::from_secs(45), "delay {delay:?} above window");

            let delay = policy.delay_for(2);
            assert!(delay >= Duration::from_secs(30), "delay {delay:?} below window");
            assert!(delay <= Duration::from_secs(90), "delay {delay:?} above window");
        }
    }

    #[test]
    fn jitter_varies_between_draws() {
        let policy = RetryPolicy::default();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..50 {
            seen.insert(policy.delay_for(1).as_millis());
        }
        assert!(seen.len() > 1, "jitter should create variation");
    }
}
