//! Classification law: the retry decision is a deterministic function of
//! `(outcome class, attempt number, max attempts)`, checked over the full
//! Cartesian product.

use std::time::Duration;

use courier_delivery::{DeliveryOutcome, RetryDecision, RetryPolicy};
use proptest::prelude::*;

fn all_outcomes() -> Vec<DeliveryOutcome> {
    vec![
        DeliveryOutcome::Success2xx(200),
        DeliveryOutcome::Client4xxPermanent(404),
        DeliveryOutcome::Client4xxRetriable(429),
        DeliveryOutcome::Server5xx(503),
        DeliveryOutcome::Timeout,
        DeliveryOutcome::ConnectionError,
        DeliveryOutcome::InvalidUrl,
    ]
}

fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy { max_attempts, jitter_factor: 0.0, ..Default::default() }
}

#[test]
fn full_cartesian_product_is_deterministic() {
    for max_attempts in 1..=6u32 {
        let policy = policy(max_attempts);
        for attempt in 1..=max_attempts + 2 {
            for outcome in all_outcomes() {
                let expected = match outcome {
                    DeliveryOutcome::Success2xx(_) => RetryDecision::CompleteSuccess,
                    DeliveryOutcome::Client4xxPermanent(_) | DeliveryOutcome::InvalidUrl => {
                        RetryDecision::FailPermanent
                    },
                    _ if attempt >= max_attempts => RetryDecision::FailPermanent,
                    _ => RetryDecision::ScheduleRetry { delay: policy.delay_for(attempt) },
                };

                assert_eq!(
                    policy.decide(&outcome, attempt),
                    expected,
                    "outcome {outcome:?} attempt {attempt} max {max_attempts}"
                );
            }
        }
    }
}

proptest! {
    #[test]
    fn decision_is_pure(attempt in 1u32..20, max_attempts in 1u32..20, outcome_index in 0usize..7) {
        let policy = policy(max_attempts);
        let outcome = all_outcomes()[outcome_index];

        let first = policy.decide(&outcome, attempt);
        let second = policy.decide(&outcome, attempt);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn retries_never_scheduled_past_the_ceiling(attempt in 1u32..40, max_attempts in 1u32..20) {
        let policy = policy(max_attempts);
        let decision = policy.decide(&DeliveryOutcome::Server5xx(503), attempt);

        if attempt >= max_attempts {
            prop_assert_eq!(decision, RetryDecision::FailPermanent);
        } else {
            let is_schedule_retry = matches!(decision, RetryDecision::ScheduleRetry { .. });
            prop_assert!(is_schedule_retry);
        }
    }

    #[test]
    fn jittered_delay_stays_in_window(attempt in 1u32..10) {
        let policy = RetryPolicy::default();
        let exponent = attempt.saturating_sub(1).min(20);
        let base = std::cmp::min(
            policy.base_delay * 2_u32.pow(exponent),
            policy.max_delay,
        );

        let delay = policy.delay_for(attempt);
        prop_assert!(delay >= base.mul_f64(0.5) - Duration::from_millis(1));
        prop_assert!(delay <= base.mul_f64(1.5) + Duration::from_millis(1));
    }
}
