//! Per-destination circuit breakers.
//!
//! One breaker per destination host (scheme plus authority). Repeated
//! failures open the breaker and deliveries to that host fail fast; after
//! the reset timeout a single probe is allowed through, and its outcome
//! decides between closing and reopening.
//!
//! ```text
//!            failure_threshold reached
//!  CLOSED ──────────────────────────────▶ OPEN
//!    ▲                                      │ reset_timeout elapsed
//!    │ probe succeeds                       ▼
//!    └─────────────────────────────── HALF-OPEN ──probe fails──▶ OPEN
//! ```

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, SystemTime},
};

use courier_core::time::Clock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Breaker configuration shared by all hosts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time an open circuit waits before allowing a probe.
    pub reset_timeout: Duration,
    /// Whether timeouts count toward tripping. Timeouts from a slow but
    /// alive receiver can be excluded so only hard failures open the
    /// circuit.
    pub trip_on_timeout: bool,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            trip_on_timeout: true,
        }
    }
}

/// Current state of one breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation, all calls proceed.
    Closed,
    /// Destination unhealthy, calls fail fast.
    Open,
    /// Testing recovery with a single probe.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug)]
struct Breaker {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<SystemTime>,
    probe_in_flight: bool,
}

impl Breaker {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            probe_in_flight: false,
        }
    }
}

/// Point-in-time view of one breaker, for health and metrics.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    /// Destination host the breaker guards.
    pub host: String,
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures observed.
    pub consecutive_failures: u32,
}

/// Thread-safe registry of per-host breakers.
pub struct CircuitBreakerRegistry {
    config: CircuitConfig,
    clock: Arc<dyn Clock>,
    circuits: Mutex<HashMap<String, Breaker>>,
}

impl CircuitBreakerRegistry {
    /// Creates a registry with the given configuration and clock.
    pub fn new(config: CircuitConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock, circuits: Mutex::new(HashMap::new()) }
    }

    /// Whether a call to `host` may proceed.
    ///
    /// Handles the open-to-half-open transition when the reset timeout has
    /// elapsed; in half-open state exactly one probe is admitted.
    pub async fn should_allow(&self, host: &str) -> bool {
        let now = self.clock.now_system();
        let mut circuits = self.circuits.lock().await;
        let breaker = circuits.entry(host.to_string()).or_insert_with(Breaker::new);

        if breaker.state == CircuitState::Open {
            let cooled_down = breaker
                .opened_at
                .and_then(|at| now.duration_since(at).ok())
                .is_some_and(|elapsed| elapsed >= self.config.reset_timeout);
            if cooled_down {
                tracing::info!(host, "circuit breaker transitioning to half-open");
                breaker.state = CircuitState::HalfOpen;
                breaker.probe_in_flight = false;
            }
        }

        match breaker.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if breaker.probe_in_flight {
                    false
                } else {
                    breaker.probe_in_flight = true;
                    true
                }
            },
        }
    }

    /// Records a successful call to `host`.
    pub async fn record_success(&self, host: &str) {
        let mut circuits = self.circuits.lock().await;
        let breaker = circuits.entry(host.to_string()).or_insert_with(Breaker::new);

        match breaker.state {
            CircuitState::Closed => {
                breaker.consecutive_failures = 0;
            },
            CircuitState::HalfOpen => {
                tracing::info!(host, "circuit breaker closing, destination recovered");
                breaker.state = CircuitState::Closed;
                breaker.consecutive_failures = 0;
                breaker.opened_at = None;
                breaker.probe_in_flight = false;
            },
            CircuitState::Open => {
                tracing::warn!(host, "success recorded while circuit open");
            },
        }
    }

    /// Records a failed call to `host` with its outcome class label.
    ///
    /// Classes excluded from tripping still clear the half-open probe but
    /// do not advance the failure counter in closed state.
    pub async fn record_failure(&self, host: &str, class_label: &str) {
        let excluded = class_label == "timeout" && !self.config.trip_on_timeout;

        let now = self.clock.now_system();
        let mut circuits = self.circuits.lock().await;
        let breaker = circuits.entry(host.to_string()).or_insert_with(Breaker::new);

        match breaker.state {
            CircuitState::Closed => {
                if excluded {
                    return;
                }
                breaker.consecutive_failures += 1;
                if breaker.consecutive_failures >= self.config.failure_threshold {
                    tracing::warn!(
                        host,
                        consecutive_failures = breaker.consecutive_failures,
                        "circuit breaker opening"
                    );
                    breaker.state = CircuitState::Open;
                    breaker.opened_at = Some(now);
                }
            },
            CircuitState::HalfOpen => {
                tracing::warn!(host, "probe failed, circuit breaker reopening");
                breaker.state = CircuitState::Open;
                breaker.consecutive_failures = 0;
                breaker.opened_at = Some(now);
                breaker.probe_in_flight = false;
            },
            CircuitState::Open => {},
        }
    }

    /// Current state of the breaker for `host`, if one exists.
    pub async fn state(&self, host: &str) -> Option<CircuitState> {
        self.circuits.lock().await.get(host).map(|breaker| breaker.state)
    }

    /// Snapshot of every known breaker.
    pub async fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let circuits = self.circuits.lock().await;
        let mut snapshots: Vec<BreakerSnapshot> = circuits
            .iter()
            .map(|(host, breaker)| BreakerSnapshot {
                host: host.clone(),
                state: breaker.state,
                consecutive_failures: breaker.consecutive_failures,
            })
            .collect();
        snapshots.sort_by(|a, b| a.host.cmp(&b.host));
        snapshots
    }

    /// Hosts whose breaker is currently open.
    pub async fn open_hosts(&self) -> Vec<String> {
        self.snapshot()
            .await
            .into_iter()
            .filter(|snapshot| snapshot.state == CircuitState::Open)
            .map(|snapshot| snapshot.host)
            .collect()
    }

    /// Forces a breaker into a state, for tests and operator tooling.
    pub async fn force_state(&self, host: &str, state: CircuitState) {
        let now = self.clock.now_system();
        let mut circuits = self.circuits.lock().await;
        let breaker = circuits.entry(host.to_string()).or_insert_with(Breaker::new);

        breaker.state = state;
        breaker.probe_in_flight = false;
        if state == CircuitState::Open {
            breaker.opened_at = Some(now);
        }
        if state == CircuitState::Closed {
            breaker.consecutive_failures = 0;
            breaker.opened_at = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use courier_core::time::RealClock;

    use super::*;

    fn registry(threshold: u32) -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::new(
            CircuitConfig {
                failure_threshold: threshold,
                reset_timeout: Duration::from_secs(60),
                trip_on_timeout: true,
            },
            Arc::new(RealClock::new()),
        )
    }

    #[tokio::test]
    async fn circuit_starts_closed() {
        let registry = registry(3);
        assert!(registry.should_allow("https://ok.example.com").await);
        assert_eq!(registry.state("https://ok.example.com").await, Some(CircuitState::Closed));
    }

    #[tokio::test]
    async fn threshold_consecutive_failures_open_circuit() {
        let registry = registry(3);
        let host = "https://down.example.com";

        for _ in 0..2 {
            registry.record_failure(host, "connection_error").await;
            assert!(registry.should_allow(host).await);
        }

        registry.record_failure(host, "connection_error").await;
        assert!(!registry.should_allow(host).await);
        assert_eq!(registry.state(host).await, Some(CircuitState::Open));
    }

    #[tokio::test]
    async fn success_resets_failure_counter() {
        let registry = registry(3);
        let host = "https://flaky.example.com";

        registry.record_failure(host, "server_5xx").await;
        registry.record_failure(host, "server_5xx").await;
        registry.record_success(host).await;
        registry.record_failure(host, "server_5xx").await;
        registry.record_failure(host, "server_5xx").await;

        assert!(registry.should_allow(host).await, "counter reset by success");
    }

    #[tokio::test]
    async fn excluded_timeouts_do_not_trip() {
        let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
        let registry = CircuitBreakerRegistry::new(
            CircuitConfig {
                failure_threshold: 2,
                reset_timeout: Duration::from_secs(60),
                trip_on_timeout: false,
            },
            clock,
        );
        let host = "https://slow.example.com";

        for _ in 0..5 {
            registry.record_failure(host, "timeout").await;
        }
        assert!(registry.should_allow(host).await, "timeouts excluded from tripping");

        registry.record_failure(host, "connection_error").await;
        registry.record_failure(host, "connection_error").await;
        assert!(!registry.should_allow(host).await);
    }

    #[tokio::test]
    async fn half_open_admits_single_probe() {
        let registry = registry(2);
        let host = "https://probe.example.com";

        registry.force_state(host, CircuitState::HalfOpen).await;

        assert!(registry.should_allow(host).await, "first probe admitted");
        assert!(!registry.should_allow(host).await, "second call refused while probing");
    }

    #[tokio::test]
    async fn probe_success_closes_circuit() {
        let registry = registry(2);
        let host = "https://probe.example.com";

        registry.force_state(host, CircuitState::HalfOpen).await;
        assert!(registry.should_allow(host).await);
        registry.record_success(host).await;

        assert_eq!(registry.state(host).await, Some(CircuitState::Closed));
        assert!(registry.should_allow(host).await);
    }

    #[tokio::test]
    async fn probe_failure_reopens_circuit() {
        let registry = registry(2);
        let host = "https://probe.example.com";

        registry.force_state(host, CircuitState::HalfOpen).await;
        assert!(registry.should_allow(host).await);
        registry.record_failure(host, "server_5xx").await;

        assert_eq!(registry.state(host).await, Some(CircuitState::Open));
        assert!(!registry.should_allow(host).await);
    }

    #[tokio::test]
    async fn snapshot_lists_hosts_sorted() {
        let registry = registry(1);
        registry.record_failure("https://b.example.com", "server_5xx").await;
        registry.record_failure("https://a.example.com", "server_5xx").await;

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].host, "https://a.example.com");
        assert_eq!(snapshot[0].state, CircuitState::Open);

        let open = registry.open_hosts().await;
        assert_eq!(open.len(), 2);
    }
}
