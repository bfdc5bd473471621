//! Server lifecycle: health state transitions and in-flight request
//! tracking for graceful shutdown.
//!
//! Uses `ArcSwap` for lock-free health state transitions and an atomic
//! counter with RAII guards for in-flight tracking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

/// Server health state.
///
/// State machine: Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Initializing; not yet accepting requests.
    Starting,
    /// Fully operational.
    Ready,
    /// Finishing in-flight requests; readiness probes fail.
    Draining,
    /// All in-flight requests completed.
    Stopped,
}

impl HealthState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

/// Coordinates startup readiness and graceful shutdown.
///
/// 1. Health probes check `health_state()` to report readiness
/// 2. The in-flight middleware holds a guard for every request
/// 3. `trigger_shutdown()` moves to Draining once the listener stops
/// 4. `wait_for_drain()` waits until in-flight requests complete
#[derive(Debug)]
pub struct Lifecycle {
    in_flight: Arc<AtomicU64>,
    health_state: ArcSwap<HealthState>,
}

impl Lifecycle {
    /// Creates a lifecycle in the `Starting` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(AtomicU64::new(0)),
            health_state: ArcSwap::from_pointee(HealthState::Starting),
        }
    }

    pub fn set_ready(&self) {
        self.health_state.store(Arc::new(HealthState::Ready));
    }

    /// Transitions to `Draining`; readiness probes fail from here on.
    pub fn trigger_shutdown(&self) {
        self.health_state.store(Arc::new(HealthState::Draining));
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.health_state.load()
    }

    /// RAII guard counting one in-flight request until dropped.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Waits up to `timeout` for in-flight requests to finish.
    ///
    /// Returns `true` and transitions to `Stopped` if they did; returns
    /// `false` (state stays `Draining`) if the timeout expired.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.in_flight.load(Ordering::Relaxed) == 0 {
                self.health_state.store(Arc::new(HealthState::Stopped));
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight counter when dropped, including during unwinding.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
