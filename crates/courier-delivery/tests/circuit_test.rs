//! Breaker law: threshold opens, reset timeout probes, one success closes.

use std::{sync::Arc, time::Duration};

use courier_core::time::Clock;
use courier_delivery::{CircuitBreakerRegistry, CircuitConfig, CircuitState};
use courier_testing::TestClock;

fn registry(clock: Arc<TestClock>) -> CircuitBreakerRegistry {
    CircuitBreakerRegistry::new(
        CircuitConfig {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            trip_on_timeout: true,
        },
        clock as Arc<dyn Clock>,
    )
}

#[tokio::test]
async fn five_failures_open_then_reset_timeout_probes_then_success_closes() {
    let clock = Arc::new(TestClock::new());
    let registry = registry(clock.clone());
    let host = "https://down.example.com";

    // Five consecutive failures trip the breaker.
    for i in 0..5 {
        assert!(registry.should_allow(host).await, "call {i} allowed while closed");
        registry.record_failure(host, "connection_error").await;
    }
    assert_eq!(registry.state(host).await, Some(CircuitState::Open));
    assert!(!registry.should_allow(host).await, "sixth call refused");

    // Before the reset timeout the circuit stays open.
    clock.advance(Duration::from_secs(59));
    assert!(!registry.should_allow(host).await);

    // After the timeout the next call is the probe.
    clock.advance(Duration::from_secs(2));
    assert!(registry.should_allow(host).await, "probe admitted after reset timeout");
    assert_eq!(registry.state(host).await, Some(CircuitState::HalfOpen));

    // A single success closes the circuit.
    registry.record_success(host).await;
    assert_eq!(registry.state(host).await, Some(CircuitState::Closed));
    assert!(registry.should_allow(host).await);
}

#[tokio::test]
async fn failed_probe_restarts_the_cooldown() {
    let clock = Arc::new(TestClock::new());
    let registry = registry(clock.clone());
    let host = "https://down.example.com";

    for _ in 0..5 {
        registry.record_failure(host, "connection_error").await;
    }

    clock.advance(Duration::from_secs(61));
    assert!(registry.should_allow(host).await, "probe admitted");
    registry.record_failure(host, "connection_error").await;
    assert_eq!(registry.state(host).await, Some(CircuitState::Open));

    // The cooldown restarted from the probe failure.
    clock.advance(Duration::from_secs(30));
    assert!(!registry.should_allow(host).await);
    clock.advance(Duration::from_secs(31));
    assert!(registry.should_allow(host).await);
}

#[tokio::test]
async fn hosts_trip_independently() {
    let clock = Arc::new(TestClock::new());
    let registry = registry(clock);

    for _ in 0..5 {
        registry.record_failure("https://down.example.com", "server_5xx").await;
    }

    assert!(!registry.should_allow("https://down.example.com").await);
    assert!(registry.should_allow("https://ok.example.com").await);

    let open = registry.open_hosts().await;
    assert_eq!(open, vec!["https://down.example.com".to_string()]);
}
