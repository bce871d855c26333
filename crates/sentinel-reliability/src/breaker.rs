//! Per-dependency circuit breaker.
//!
//! State machine: CLOSED → OPEN when `consecutive_failures ≥
//! failure_threshold` or the rolling window holds at least
//! `volume_threshold` calls with an error rate at or above
//! `error_threshold_percentage`. OPEN rejects immediately until
//! `open_timeout` elapses, then HALF_OPEN admits probes;
//! `success_threshold` successive successes close the breaker, any failure
//! reopens it. Every call is bounded by `request_timeout`; a timeout counts
//! as a failure.
//!
//! State transitions are published synchronously to observers so test
//! assertions see them in order.

use parking_lot::{Mutex, RwLock};
use sentinel_core::SentinelError;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal traffic.
    Closed,
    /// Failing fast; dependency is not invoked.
    Open,
    /// Probing the dependency after the open timeout.
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        };
        f.write_str(name)
    }
}

/// Breaker tuning parameters.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the breaker.
    pub failure_threshold: u32,
    /// Successive half-open successes required to close.
    pub success_threshold: u32,
    /// How long OPEN rejects before probing.
    pub open_timeout: Duration,
    /// Per-call deadline; a timeout counts as a failure.
    pub request_timeout: Duration,
    /// Minimum rolling-window volume before the error rate applies.
    pub volume_threshold: u32,
    /// Error rate (percent) that trips the breaker at volume.
    pub error_threshold_percentage: f64,
    /// Width of the rolling outcome window.
    pub rolling_window: Duration,
}

impl BreakerConfig {
    /// Profile for the remote KMS: tolerant of slow signing, trips fast.
    pub fn kms() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 2,
            open_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(5),
            volume_threshold: 10,
            error_threshold_percentage: 50.0,
            rolling_window: Duration::from_secs(60),
        }
    }

    /// Profile for the persistence layer.
    pub fn database() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            open_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(2),
            volume_threshold: 20,
            error_threshold_percentage: 50.0,
            rolling_window: Duration::from_secs(60),
        }
    }

    /// Profile for third-party APIs.
    pub fn external_api() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(10),
            volume_threshold: 10,
            error_threshold_percentage: 60.0,
            rolling_window: Duration::from_secs(120),
        }
    }

    /// Profile for dependencies on the approval-critical path.
    pub fn critical() -> Self {
        Self {
            failure_threshold: 2,
            success_threshold: 3,
            open_timeout: Duration::from_secs(15),
            request_timeout: Duration::from_secs(3),
            volume_threshold: 5,
            error_threshold_percentage: 25.0,
            rolling_window: Duration::from_secs(30),
        }
    }
}

/// Errors a breaker-wrapped call can produce.
#[derive(Debug, thiserror::Error)]
pub enum BreakerError {
    /// The breaker is open; the dependency was not invoked.
    #[error("circuit breaker '{name}' is open, failing fast")]
    Open {
        /// Breaker name.
        name: String,
        /// Time remaining until the next probe window.
        retry_after: Duration,
    },

    /// The call exceeded `request_timeout`.
    #[error("circuit breaker '{name}' timed out after {timeout:?}")]
    Timeout {
        /// Breaker name.
        name: String,
        /// The enforced deadline.
        timeout: Duration,
    },

    /// The underlying operation failed.
    #[error(transparent)]
    Inner(#[from] SentinelError),
}

impl BreakerError {
    /// Convert into the unified error type with a retry hint.
    pub fn into_sentinel(self) -> SentinelError {
        match self {
            Self::Open { name, retry_after } => SentinelError::unavailable_retry_after(
                format!("circuit breaker '{name}' is open"),
                retry_after.as_secs().max(1),
            ),
            Self::Timeout { name, timeout } => SentinelError::unavailable(format!(
                "dependency '{name}' timed out after {timeout:?}"
            )),
            Self::Inner(e) => e,
        }
    }
}

/// Observer of breaker state transitions.
pub trait BreakerObserver: Send + Sync {
    /// Called synchronously on every transition.
    fn state_change(&self, name: &str, old: BreakerState, new: BreakerState, reason: &str);
}

struct BreakerCore {
    state: BreakerState,
    consecutive_failures: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
    window: VecDeque<(Instant, bool)>,
}

/// Failure isolation for one named dependency.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    core: Mutex<BreakerCore>,
    observers: RwLock<Vec<Arc<dyn BreakerObserver>>>,
}

impl CircuitBreaker {
    /// Create a breaker for the named dependency.
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            core: Mutex::new(BreakerCore {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                opened_at: None,
                window: VecDeque::new(),
            }),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Register a state-change observer.
    pub fn subscribe(&self, observer: Arc<dyn BreakerObserver>) {
        self.observers.write().push(observer);
    }

    /// Current state.
    pub fn state(&self) -> BreakerState {
        self.core.lock().state
    }

    /// Breaker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `op` through the breaker.
    ///
    /// Admission is checked first: an open breaker rejects without invoking
    /// the dependency. The call itself is bounded by `request_timeout`.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = sentinel_core::Result<T>>,
    {
        self.admit()?;
        let outcome = tokio::time::timeout(self.config.request_timeout, op()).await;
        match outcome {
            Ok(Ok(value)) => {
                self.on_success();
                Ok(value)
            }
            Ok(Err(e)) => {
                self.on_failure("operation failed");
                Err(BreakerError::Inner(e))
            }
            Err(_) => {
                self.on_failure("request timeout");
                Err(BreakerError::Timeout {
                    name: self.name.clone(),
                    timeout: self.config.request_timeout,
                })
            }
        }
    }

    fn admit(&self) -> Result<(), BreakerError> {
        let mut core = self.core.lock();
        if core.state == BreakerState::Open {
            let opened_at = core.opened_at.unwrap_or_else(Instant::now);
            let elapsed = opened_at.elapsed();
            if elapsed >= self.config.open_timeout {
                let old = core.state;
                core.state = BreakerState::HalfOpen;
                core.half_open_successes = 0;
                drop(core);
                self.publish(old, BreakerState::HalfOpen, "open timeout elapsed");
                return Ok(());
            }
            return Err(BreakerError::Open {
                name: self.name.clone(),
                retry_after: self.config.open_timeout - elapsed,
            });
        }
        Ok(())
    }

    fn on_success(&self) {
        let mut core = self.core.lock();
        let now = Instant::now();
        core.window.push_back((now, true));
        self.trim_window(&mut core, now);
        core.consecutive_failures = 0;
        if core.state == BreakerState::HalfOpen {
            core.half_open_successes += 1;
            if core.half_open_successes >= self.config.success_threshold {
                let old = core.state;
                core.state = BreakerState::Closed;
                core.opened_at = None;
                core.window.clear();
                drop(core);
                self.publish(old, BreakerState::Closed, "success threshold reached");
            }
        }
    }

    fn on_failure(&self, reason: &str) {
        let mut core = self.core.lock();
        let now = Instant::now();
        core.window.push_back((now, false));
        self.trim_window(&mut core, now);
        core.consecutive_failures += 1;

        let breach = match core.state {
            // Any half-open failure reopens immediately.
            BreakerState::HalfOpen => true,
            BreakerState::Closed => {
                core.consecutive_failures >= self.config.failure_threshold
                    || self.window_breached(&core)
            }
            BreakerState::Open => false,
        };
        if breach {
            let old = core.state;
            core.state = BreakerState::Open;
            core.opened_at = Some(now);
            core.half_open_successes = 0;
            drop(core);
            self.publish(old, BreakerState::Open, reason);
            tracing::warn!(breaker = %self.name, reason, "circuit breaker opened");
        }
    }

    fn trim_window(&self, core: &mut BreakerCore, now: Instant) {
        while let Some(&(at, _)) = core.window.front() {
            if now.duration_since(at) > self.config.rolling_window {
                core.window.pop_front();
            } else {
                break;
            }
        }
    }

    fn window_breached(&self, core: &BreakerCore) -> bool {
        let volume = core.window.len() as u32;
        if volume < self.config.volume_threshold {
            return false;
        }
        let failures = core.window.iter().filter(|(_, ok)| !ok).count() as f64;
        let rate = failures * 100.0 / f64::from(volume);
        rate >= self.config.error_threshold_percentage
    }

    fn publish(&self, old: BreakerState, new: BreakerState, reason: &str) {
        for observer in self.observers.read().iter() {
            observer.state_change(&self.name, old, new, reason);
        }
    }
}

/// Read-mostly registry of named breakers.
#[derive(Default)]
pub struct BreakerRegistry {
    breakers: RwLock<Vec<Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a breaker and return its handle.
    pub fn register(&self, breaker: CircuitBreaker) -> Arc<CircuitBreaker> {
        let breaker = Arc::new(breaker);
        self.breakers.write().push(breaker.clone());
        breaker
    }

    /// Look up a breaker by name.
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .read()
            .iter()
            .find(|b| b.name() == name)
            .cloned()
    }

    /// Names of breakers currently not CLOSED, for health reporting.
    pub fn degraded(&self) -> Vec<String> {
        self.breakers
            .read()
            .iter()
            .filter(|b| b.state() != BreakerState::Closed)
            .map(|b| b.name().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as SyncMutex;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            open_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(1),
            volume_threshold: 100,
            error_threshold_percentage: 50.0,
            rolling_window: Duration::from_secs(60),
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), BreakerError> {
        breaker
            .call(|| async { Err::<(), _>(SentinelError::unavailable("induced")) })
            .await
            .map(|_: ()| ())
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<(), BreakerError> {
        breaker.call(|| async { Ok(()) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_failures_open_the_breaker() {
        let breaker = CircuitBreaker::new("kms", fast_config());
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        // The dependency must not be invoked while open.
        let invoked = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = invoked.clone();
        let result = breaker
            .call(move || async move {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(BreakerError::Open { .. })));
        assert!(!invoked.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_recovers_through_half_open() {
        let breaker = CircuitBreaker::new("kms", fast_config());
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::advance(Duration::from_secs(31)).await;
        succeed(&breaker).await.expect("first probe");
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        succeed(&breaker).await.expect("second probe");
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("db", fast_config());
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        tokio::time::advance(Duration::from_secs(31)).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_failure() {
        let mut config = fast_config();
        config.failure_threshold = 1;
        let breaker = CircuitBreaker::new("slow", config);
        let result: Result<(), _> = breaker
            .call(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(BreakerError::Timeout { .. })));
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn windowed_error_rate_trips_at_volume() {
        let mut config = fast_config();
        config.failure_threshold = 1000; // only the window can trip
        config.volume_threshold = 10;
        config.error_threshold_percentage = 50.0;
        let breaker = CircuitBreaker::new("api", config);

        for _ in 0..5 {
            succeed(&breaker).await.expect("success");
        }
        for _ in 0..5 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn observers_see_transitions_in_order() {
        struct Recorder(SyncMutex<Vec<(BreakerState, BreakerState)>>);
        impl BreakerObserver for Recorder {
            fn state_change(&self, _: &str, old: BreakerState, new: BreakerState, _: &str) {
                self.0.lock().push((old, new));
            }
        }

        let breaker = CircuitBreaker::new("kms", fast_config());
        let recorder = Arc::new(Recorder(SyncMutex::new(Vec::new())));
        breaker.subscribe(recorder.clone());

        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        tokio::time::advance(Duration::from_secs(31)).await;
        succeed(&breaker).await.expect("probe");
        succeed(&breaker).await.expect("probe");

        let transitions = recorder.0.lock().clone();
        assert_eq!(
            transitions,
            vec![
                (BreakerState::Closed, BreakerState::Open),
                (BreakerState::Open, BreakerState::HalfOpen),
                (BreakerState::HalfOpen, BreakerState::Closed),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn open_error_carries_retry_hint() {
        let breaker = CircuitBreaker::new("kms", fast_config());
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        let err = fail(&breaker).await.expect_err("open");
        match err.into_sentinel() {
            SentinelError::DependencyUnavailable {
                retry_after_secs, ..
            } => assert!(retry_after_secs.is_some()),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
