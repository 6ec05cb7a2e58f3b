//! Deterministic time control for reproducible time-based test scenarios.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use courier_core::time::Clock;

/// Test clock for deterministic time control.
///
/// Sleeping advances virtual time immediately, so worker poll loops and
/// delayed-task visibility run at full speed under test.
#[derive(Clone)]
pub struct TestClock {
    /// Monotonic time in nanoseconds since start.
    monotonic_ns: Arc<AtomicU64>,
    /// System time as milliseconds since `UNIX_EPOCH`.
    system_ms: Arc<AtomicU64>,
    /// Base instant for monotonic time calculations.
    base_instant: Instant,
}

impl TestClock {
    /// Creates a new test clock starting at the current time.
    pub fn new() -> Self {
        let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();

        Self {
            monotonic_ns: Arc::new(AtomicU64::new(0)),
            system_ms: Arc::new(AtomicU64::new(
                u64::try_from(since_epoch.as_millis()).unwrap_or(0),
            )),
            base_instant: Instant::now(),
        }
    }

    /// Advances both clocks by the specified duration.
    pub fn advance(&self, duration: Duration) {
        self.monotonic_ns.fetch_add(
            u64::try_from(duration.as_nanos().min(u128::from(u64::MAX))).unwrap_or(0),
            Ordering::AcqRel,
        );
        self.system_ms.fetch_add(
            u64::try_from(duration.as_millis().min(u128::from(u64::MAX))).unwrap_or(0),
            Ordering::AcqRel,
        );
    }

    /// Returns elapsed virtual time since clock creation.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.monotonic_ns.load(Ordering::Acquire))
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        let elapsed_ns = self.monotonic_ns.load(Ordering::Acquire);
        self.base_instant + Duration::from_nanos(elapsed_ns)
    }

    fn now_system(&self) -> SystemTime {
        let ms = self.system_ms.load(Ordering::Acquire);
        UNIX_EPOCH + Duration::from_millis(ms)
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        // Sleeping advances virtual time; yield so other tasks get a turn.
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}
