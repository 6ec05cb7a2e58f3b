//! Delivery pipeline metrics.
//!
//! Metric name constants, a one-time description pass, and small helpers
//! so call sites never repeat label plumbing.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

use crate::circuit::CircuitState;

/// Delivery attempts by outcome class and destination host.
pub const WEBHOOK_DELIVERY_TOTAL: &str = "webhook_delivery_total";

/// Delivery attempt duration in seconds by destination host.
pub const WEBHOOK_DELIVERY_SECONDS: &str = "webhook_delivery_seconds";

/// Circuit breaker state by destination host (0 closed, 1 open, 2 half-open).
pub const CIRCUIT_BREAKER_STATUS: &str = "circuit_breaker_status";

/// Compute task executions by outcome.
pub const COMPUTE_TASKS_TOTAL: &str = "compute_tasks_total";

/// Dead-letter entries written.
pub const DEAD_LETTERS_TOTAL: &str = "dead_letters_total";

/// Registers all delivery metric descriptions.
///
/// Call once at startup after installing the metrics recorder.
pub fn register_metrics() {
    describe_counter!(WEBHOOK_DELIVERY_TOTAL, "Delivery attempts by outcome class and host");
    describe_histogram!(WEBHOOK_DELIVERY_SECONDS, "Delivery attempt duration in seconds");
    describe_gauge!(
        CIRCUIT_BREAKER_STATUS,
        "Circuit breaker state per host: 0 closed, 1 open, 2 half-open"
    );
    describe_counter!(COMPUTE_TASKS_TOTAL, "Compute task executions by outcome");
    describe_counter!(DEAD_LETTERS_TOTAL, "Dead-letter entries written");
}

/// Records one delivery attempt.
pub fn record_delivery(status: &str, host: &str, seconds: f64) {
    let labels = [("status", status.to_string()), ("host", host.to_string())];
    counter!(WEBHOOK_DELIVERY_TOTAL, &labels).increment(1);
    histogram!(WEBHOOK_DELIVERY_SECONDS, "host" => host.to_string()).record(seconds);
}

/// Publishes the breaker state for a host.
pub fn set_circuit_status(host: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::Open => 1.0,
        CircuitState::HalfOpen => 2.0,
    };
    gauge!(CIRCUIT_BREAKER_STATUS, "host" => host.to_string()).set(value);
}

/// Records one compute task execution.
pub fn record_compute(outcome: &str) {
    counter!(COMPUTE_TASKS_TOTAL, "outcome" => outcome.to_string()).increment(1);
}

/// Records a dead-letter write.
pub fn record_dead_letter(error_class: &str) {
    counter!(DEAD_LETTERS_TOTAL, "error_class" => error_class.to_string()).increment(1);
}
