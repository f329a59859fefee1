//! Circuit Breaker
//!
//! Failure isolation for a single protected resource (an agent or a provider).
//!
//! # State Machine
//!
//! ```text
//! +--------+  failure_threshold   +-------+   open_timeout elapsed   +------------+
//! | Closed | -------------------> | Open  | -----------------------> | Half-Open  |
//! +--------+      failures        +-------+   (on can_attempt read)  +------------+
//!     ^                               ^                                    |
//!     |                               |       failure_threshold            |
//!     |                               +------------------------------------+
//!     |       half_open_success_threshold successes                        |
//!     +--------------------------------------------------------------------+
//! ```
//!
//! Transitions happen only inside [`CircuitBreaker::can_attempt`],
//! [`CircuitBreaker::record_success`] and [`CircuitBreaker::record_failure`]
//! (plus the admin operations `force_state` and `reset`).
//!
//! # Thread Safety
//!
//! Each breaker owns a `parking_lot::Mutex` around its state, so every
//! read-check-write sequence is atomic with respect to that breaker. Breakers
//! never lock each other.

use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

// ============================================================================
// Circuit State
// ============================================================================

/// Circuit breaker state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation, attempts allowed
    #[default]
    Closed,

    /// Tripped, attempts rejected until the open timeout elapses
    Open,

    /// Probing recovery, attempts allowed
    HalfOpen,
}

impl CircuitState {
    /// Label used in logs and status output
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Breaker Configuration
// ============================================================================

/// Configuration for a circuit breaker
#[derive(Clone, Debug, PartialEq)]
pub struct BreakerConfig {
    /// Failures (without an intervening success) that trip the breaker
    pub failure_threshold: u32,

    /// Time after the last failure before a probe is allowed
    pub open_timeout: Duration,

    /// Successes while half-open required to close again
    pub half_open_success_threshold: u32,

    /// Reopen immediately when a half-open probe fails, instead of waiting
    /// for `failure_threshold` failures
    pub reopen_on_half_open_failure: bool,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(60),
            half_open_success_threshold: 3,
            reopen_on_half_open_failure: false,
        }
    }
}

// ============================================================================
// Circuit Breaker
// ============================================================================

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    last_transition: Option<Instant>,
}

impl BreakerInner {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            last_transition: None,
        }
    }
}

/// Circuit breaker guarding one resource
pub struct CircuitBreaker {
    /// Owning resource id (agent id or provider name)
    resource_id: String,

    config: BreakerConfig,

    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a closed breaker with default configuration
    pub fn new(resource_id: impl Into<String>) -> Self {
        Self::with_config(resource_id, BreakerConfig::default())
    }

    /// Create a closed breaker with custom configuration
    pub fn with_config(resource_id: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            resource_id: resource_id.into(),
            config,
            inner: Mutex::new(BreakerInner::closed()),
        }
    }

    /// Resource this breaker protects
    #[must_use]
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    /// Breaker configuration
    #[must_use]
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current state (no side effects)
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Whether an attempt may be made right now.
    ///
    /// Reading an open breaker whose timeout has elapsed moves it to
    /// half-open and returns `true`.
    pub fn can_attempt(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map_or(Duration::MAX, |at| Instant::now().saturating_duration_since(at));

                if elapsed >= self.config.open_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    inner.last_transition = Some(Instant::now());
                    tracing::info!(
                        resource = %self.resource_id,
                        "Circuit breaker transitioning to half-open"
                    );
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful attempt
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = 0;

        if inner.state == CircuitState::HalfOpen {
            inner.success_count += 1;
            if inner.success_count >= self.config.half_open_success_threshold {
                inner.state = CircuitState::Closed;
                inner.success_count = 0;
                inner.last_transition = Some(Instant::now());
                tracing::info!(
                    resource = %self.resource_id,
                    "Circuit breaker closed - resource recovered"
                );
            }
        }
    }

    /// Record a failed attempt
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.failure_count += 1;
        inner.last_failure = Some(now);

        let probe_failed =
            inner.state == CircuitState::HalfOpen && self.config.reopen_on_half_open_failure;

        if inner.failure_count >= self.config.failure_threshold || probe_failed {
            if inner.state != CircuitState::Open {
                tracing::warn!(
                    resource = %self.resource_id,
                    failure_count = inner.failure_count,
                    previous = %inner.state,
                    "Circuit breaker opened"
                );
                inner.last_transition = Some(now);
            }
            inner.state = CircuitState::Open;
        }
    }

    /// Force a specific state (admin/testing)
    pub fn force_state(&self, state: CircuitState) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.state = state;
        inner.last_transition = Some(now);
        match state {
            CircuitState::Closed => {
                inner.failure_count = 0;
                inner.success_count = 0;
            }
            CircuitState::Open => inner.last_failure = Some(now),
            CircuitState::HalfOpen => inner.success_count = 0,
        }
    }

    /// Reset to a fresh closed breaker
    pub fn reset(&self) {
        *self.inner.lock() = BreakerInner::closed();
    }

    /// Point-in-time view of the breaker
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        let now = Instant::now();
        BreakerSnapshot {
            resource_id: self.resource_id.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            time_since_last_failure: inner
                .last_failure
                .map(|at| now.saturating_duration_since(at)),
            time_since_last_transition: inner
                .last_transition
                .map(|at| now.saturating_duration_since(at)),
            failure_threshold: self.config.failure_threshold,
            open_timeout: self.config.open_timeout,
            half_open_success_threshold: self.config.half_open_success_threshold,
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("resource_id", &self.resource_id)
            .field("state", &inner.state)
            .field("failure_count", &inner.failure_count)
            .field("success_count", &inner.success_count)
            .finish()
    }
}

// ============================================================================
// Breaker Snapshot
// ============================================================================

/// Immutable snapshot of breaker state
#[derive(Clone, Debug, Serialize)]
pub struct BreakerSnapshot {
    /// Owning resource id
    pub resource_id: String,

    /// Current state
    pub state: CircuitState,

    /// Failures since the last success
    pub failure_count: u32,

    /// Successes counted while half-open
    pub success_count: u32,

    /// Time since the last recorded failure
    pub time_since_last_failure: Option<Duration>,

    /// Time since the last state transition
    pub time_since_last_transition: Option<Duration>,

    /// Configured failure threshold
    pub failure_threshold: u32,

    /// Configured open timeout
    pub open_timeout: Duration,

    /// Configured half-open success threshold
    pub half_open_success_threshold: u32,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn config(failure_threshold: u32, open_timeout: Duration, successes: u32) -> BreakerConfig {
        BreakerConfig {
            failure_threshold,
            open_timeout,
            half_open_success_threshold: successes,
            reopen_on_half_open_failure: false,
        }
    }

    #[test]
    fn test_initial_state() {
        let breaker = CircuitBreaker::new("agent-1");

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.can_attempt());
        assert_eq!(breaker.snapshot().failure_count, 0);
        assert_eq!(breaker.resource_id(), "agent-1");
    }

    #[test]
    fn test_opens_after_threshold() {
        let breaker =
            CircuitBreaker::with_config("p", config(3, Duration::from_secs(60), 2));

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.can_attempt());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_attempt());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let breaker =
            CircuitBreaker::with_config("p", config(3, Duration::from_secs(60), 2));

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.snapshot().failure_count, 0);

        // Two more failures are not enough after the reset
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_blocks_until_timeout() {
        let breaker =
            CircuitBreaker::with_config("p", config(5, Duration::from_secs(60), 2));

        for _ in 0..5 {
            breaker.record_failure();
        }
        assert!(!breaker.can_attempt());

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!breaker.can_attempt());
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(breaker.can_attempt());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_closes_after_successes() {
        let breaker =
            CircuitBreaker::with_config("p", config(2, Duration::from_secs(10), 3));

        breaker.record_failure();
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(breaker.can_attempt());

        breaker.record_success();
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.can_attempt());

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_single_failure_keeps_probing() {
        let breaker =
            CircuitBreaker::with_config("p", config(3, Duration::from_secs(10), 2));

        for _ in 0..3 {
            breaker.record_failure();
        }
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(breaker.can_attempt());

        // A success resets failure_count, so one failed probe stays below threshold
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_when_configured() {
        let breaker = CircuitBreaker::with_config(
            "p",
            BreakerConfig {
                reopen_on_half_open_failure: true,
                ..config(3, Duration::from_secs(10), 2)
            },
        );

        for _ in 0..3 {
            breaker.record_failure();
        }
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(breaker.can_attempt());
        breaker.record_success();

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_attempt());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_measured_from_last_failure() {
        let breaker =
            CircuitBreaker::with_config("p", config(2, Duration::from_secs(30), 1));

        breaker.record_failure();
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(20)).await;

        // A failure while open pushes the probe window out
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(!breaker.can_attempt());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(breaker.can_attempt());
    }

    #[test]
    fn test_force_state_and_reset() {
        let breaker = CircuitBreaker::new("p");

        breaker.force_state(CircuitState::Open);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_attempt());

        breaker.force_state(CircuitState::HalfOpen);
        assert!(breaker.can_attempt());

        breaker.record_failure();
        breaker.reset();
        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failure_count, 0);
        assert!(snapshot.time_since_last_failure.is_none());
    }

    #[test]
    fn test_concurrent_failures_are_counted() {
        use std::sync::Arc;
        use std::thread;

        let breaker = Arc::new(CircuitBreaker::with_config(
            "p",
            config(1000, Duration::from_secs(60), 1),
        ));
        let mut handles = vec![];

        for _ in 0..10 {
            let b = breaker.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..50 {
                    b.record_failure();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(breaker.snapshot().failure_count, 500);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
