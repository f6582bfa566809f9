//! Circuit Breaker pattern implementation.
//!
//! The circuit breaker watches the error rate of the calls it wraps over a
//! rolling window and "opens" once it crosses a threshold, failing fast
//! instead of invoking a dependency that is already struggling.
//!
//! ## States
//!
//! - **Closed**: Normal operation, calls pass through
//! - **Open**: Calls are rejected with [`ResilienceError::CircuitOpen`] without running
//! - **Half-Open**: One probe call tests whether the dependency recovered
//!
//! ## Example
//!
//! ```rust,ignore
//! use keelson::resilience::{CircuitBreaker, CircuitBreakerConfig};
//! use keelson::Error;
//! use std::time::Duration;
//!
//! let breaker = CircuitBreaker::new(
//!     CircuitBreakerConfig::new("inventory")
//!         .error_threshold_percentage(50.0)
//!         .reset_timeout(Duration::from_secs(30)),
//! );
//!
//! let result: Result<Stock, Error> = breaker.execute(|| async {
//!     inventory.fetch(sku).await.map_err(Error::operation)
//! }).await;
//!
//! match result {
//!     Ok(stock) => respond(stock),
//!     Err(e) if e.is_circuit_open() => respond_unavailable(),
//!     Err(e) => return Err(e),
//! }
//! ```

use super::rolling::{CallOutcome, RollingWindow, WindowSnapshot};
use crate::error::ResilienceError;
use crate::events::{self, EventBus, EventKind};
use crate::health::{HealthCheckDescriptor, HealthCheckResult};
use parking_lot::Mutex;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, requests pass through normally.
    Closed,
    /// Circuit is open, requests are rejected.
    Open,
    /// Circuit is half-open, a single probe tests recovery.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Name of the circuit breaker (for logging/events).
    pub name: String,
    /// Per-call timeout. Expiry counts as a failure. `None` disables it.
    pub timeout: Option<Duration>,
    /// Rolling error rate (0-100) at which the circuit opens.
    pub error_threshold_percentage: f64,
    /// Time to wait before transitioning from open to half-open.
    pub reset_timeout: Duration,
    /// Duration covered by the rolling statistics.
    pub rolling_window: Duration,
    /// Number of buckets the rolling window is split into.
    pub rolling_buckets: u32,
    /// Minimum requests in the window before the error rate is evaluated.
    pub volume_threshold: u64,
    /// Optional bus for state-change and call notifications.
    pub events: Option<EventBus>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            timeout: Some(Duration::from_millis(3000)),
            error_threshold_percentage: 50.0,
            reset_timeout: Duration::from_secs(30),
            rolling_window: Duration::from_secs(10),
            rolling_buckets: 10,
            volume_threshold: 0,
            events: None,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration with a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the per-call timeout, or `None` to disable it.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the error rate threshold (percentage).
    pub fn error_threshold_percentage(mut self, percentage: f64) -> Self {
        self.error_threshold_percentage = percentage;
        self
    }

    /// Set the reset timeout.
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Set the rolling window and its bucket count.
    pub fn rolling_window(mut self, window: Duration, buckets: u32) -> Self {
        self.rolling_window = window;
        self.rolling_buckets = buckets;
        self
    }

    /// Set the minimum request volume before the circuit may open.
    pub fn volume_threshold(mut self, requests: u64) -> Self {
        self.volume_threshold = requests;
        self
    }

    /// Publish notifications on the given bus.
    pub fn events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }
}

struct BreakerState {
    state: CircuitState,
    opened_at: Option<Instant>,
    window: RollingWindow,
}

/// How a call got through the circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
}

/// Releases the half-open probe slot even if the caller drops the call.
struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if self.admission == Admission::Probe {
            self.breaker.probe_in_flight.store(false, Ordering::Release);
        }
    }
}

/// Circuit breaker for protecting against cascade failures.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
    probe_in_flight: AtomicBool,
    total_requests: AtomicU64,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
    total_timeouts: AtomicU64,
    total_rejections: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration.
    pub fn new(config: CircuitBreakerConfig) -> Arc<Self> {
        info!(
            name = %config.name,
            error_threshold_percentage = config.error_threshold_percentage,
            reset_timeout = ?config.reset_timeout,
            timeout = ?config.timeout,
            "Circuit breaker initialized"
        );

        Arc::new(Self {
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                opened_at: None,
                window: RollingWindow::new(config.rolling_window, config.rolling_buckets),
            }),
            config,
            probe_in_flight: AtomicBool::new(false),
            total_requests: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_timeouts: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
        })
    }

    /// Get the current circuit state.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.maybe_transition_to_half_open(&mut inner);
        inner.state
    }

    /// Get the circuit breaker name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Execute an operation with circuit breaker protection.
    ///
    /// While open, fails with [`ResilienceError::CircuitOpen`] without
    /// invoking `op`. A per-call timeout surfaces as
    /// [`ResilienceError::Timeout`]. Errors from `op` are returned unchanged.
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<ResilienceError> + Display,
    {
        let Some(permit) = self.try_acquire() else {
            return Err(self.reject().into());
        };

        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        let result = match self.config.timeout {
            Some(limit) => match tokio::time::timeout(limit, op()).await {
                Ok(result) => result,
                Err(_) => {
                    self.on_timeout(&permit, limit);
                    return Err(ResilienceError::Timeout { after: limit }.into());
                }
            },
            None => op().await,
        };

        match result {
            Ok(value) => {
                self.on_success(&permit, started.elapsed());
                Ok(value)
            }
            Err(err) => {
                self.on_failure(&permit, started.elapsed(), &err);
                Err(err)
            }
        }
    }

    /// Execute with a fallback invoked whenever the call is rejected or fails.
    ///
    /// The fallback receives the error that would otherwise have been
    /// returned.
    pub async fn execute_with_fallback<F, Fut, FB, FbFut, T, E>(
        &self,
        op: F,
        fallback: FB,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce(E) -> FbFut,
        FbFut: Future<Output = Result<T, E>>,
        E: From<ResilienceError> + Display,
    {
        match self.execute(op).await {
            Ok(value) => Ok(value),
            Err(err) => {
                debug!(name = %self.config.name, error = %err, "Circuit breaker invoking fallback");
                self.emit(EventKind::Fallback);
                fallback(err).await
            }
        }
    }

    fn try_acquire(&self) -> Option<CallPermit<'_>> {
        let mut inner = self.inner.lock();
        self.maybe_transition_to_half_open(&mut inner);

        let admission = match inner.state {
            CircuitState::Closed => Admission::Normal,
            CircuitState::Open => return None,
            CircuitState::HalfOpen => {
                if self
                    .probe_in_flight
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    return None;
                }
                debug!(name = %self.config.name, "Circuit breaker admitting probe");
                Admission::Probe
            }
        };

        Some(CallPermit {
            breaker: self,
            admission,
        })
    }

    fn reject(&self) -> ResilienceError {
        self.total_rejections.fetch_add(1, Ordering::Relaxed);

        let state = {
            let mut inner = self.inner.lock();
            inner.window.record(CallOutcome::Rejected);
            inner.state
        };

        debug!(name = %self.config.name, state = %state, "Circuit breaker rejected request");
        self.emit(EventKind::Reject {
            reason: format!("circuit {}", state),
        });

        ResilienceError::CircuitOpen {
            name: self.config.name.clone(),
        }
    }

    fn on_success(&self, permit: &CallPermit<'_>, duration: Duration) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        self.emit(EventKind::Success {
            duration_ms: duration.as_millis() as u64,
        });

        let mut inner = self.inner.lock();
        inner.window.record(CallOutcome::Success);

        if permit.admission == Admission::Probe {
            self.close(&mut inner);
        }
    }

    fn on_failure<E: Display>(&self, permit: &CallPermit<'_>, duration: Duration, err: &E) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        debug!(name = %self.config.name, error = %err, "Circuit breaker recorded failure");
        self.emit(EventKind::Failure {
            duration_ms: duration.as_millis() as u64,
            error: err.to_string(),
        });

        self.record_failure(permit, CallOutcome::Failure);
    }

    fn on_timeout(&self, permit: &CallPermit<'_>, limit: Duration) {
        self.total_timeouts.fetch_add(1, Ordering::Relaxed);
        warn!(name = %self.config.name, timeout = ?limit, "Circuit breaker call timed out");
        self.emit(EventKind::Timeout {
            timeout_ms: limit.as_millis() as u64,
        });

        self.record_failure(permit, CallOutcome::Timeout);
    }

    fn record_failure(&self, permit: &CallPermit<'_>, outcome: CallOutcome) {
        let mut inner = self.inner.lock();
        inner.window.record(outcome);

        match permit.admission {
            // A failed probe reopens and restarts the reset timer.
            Admission::Probe => self.open(&mut inner),
            Admission::Normal if inner.state == CircuitState::Closed => {
                let snapshot = inner.window.snapshot();
                if snapshot.requests >= self.config.volume_threshold
                    && snapshot.error_rate() >= self.config.error_threshold_percentage
                {
                    self.open(&mut inner);
                }
            }
            Admission::Normal => {}
        }
    }

    fn open(&self, inner: &mut BreakerState) {
        let snapshot = inner.window.snapshot();
        warn!(
            name = %self.config.name,
            from = %inner.state,
            error_rate = snapshot.error_rate(),
            requests = snapshot.requests,
            "Circuit breaker OPENED"
        );

        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        self.emit(EventKind::Open {
            error_rate: snapshot.error_rate(),
            requests: snapshot.requests,
        });
    }

    fn close(&self, inner: &mut BreakerState) {
        if inner.state == CircuitState::Closed {
            return;
        }

        info!(name = %self.config.name, "Circuit breaker CLOSED");
        inner.state = CircuitState::Closed;
        inner.opened_at = None;
        inner.window.reset();
        self.emit(EventKind::Close);
    }

    /// Transition to half-open state if reset timeout has elapsed.
    fn maybe_transition_to_half_open(&self, inner: &mut BreakerState) {
        if inner.state != CircuitState::Open {
            return;
        }

        if let Some(opened_at) = inner.opened_at
            && opened_at.elapsed() >= self.config.reset_timeout
        {
            debug!(name = %self.config.name, "Circuit breaker transitioning to HALF-OPEN");
            inner.state = CircuitState::HalfOpen;
            self.emit(EventKind::HalfOpen);
        }
    }

    /// Manually reset the circuit breaker to closed state.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        self.close(&mut inner);
    }

    /// Manually force the circuit open.
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Open {
            self.open(&mut inner);
        }
    }

    /// Get circuit breaker statistics.
    pub fn stats(&self) -> CircuitBreakerStats {
        let (state, window) = {
            let mut inner = self.inner.lock();
            self.maybe_transition_to_half_open(&mut inner);
            (inner.state, inner.window.snapshot())
        };

        CircuitBreakerStats {
            name: self.config.name.clone(),
            state,
            window,
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_timeouts: self.total_timeouts.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
        }
    }

    /// Health probe reporting unhealthy while open and degraded while
    /// half-open.
    pub fn health_check(self: &Arc<Self>) -> HealthCheckDescriptor {
        let breaker = Arc::clone(self);

        HealthCheckDescriptor::from_fn(format!("circuit:{}", self.config.name), move || {
            let stats = breaker.stats();
            async move {
                let result = match stats.state {
                    CircuitState::Closed => HealthCheckResult::healthy(),
                    CircuitState::HalfOpen => {
                        HealthCheckResult::degraded("circuit is half-open, probing recovery")
                    }
                    CircuitState::Open => HealthCheckResult::unhealthy("circuit is open"),
                };

                Ok(result
                    .with_metadata("state", stats.state.to_string())
                    .with_metadata("errorRate", stats.error_rate())
                    .with_metadata("totalRejections", stats.total_rejections))
            }
        })
    }

    fn emit(&self, kind: EventKind) {
        events::emit(&self.config.events, &self.config.name, kind);
    }
}

/// Circuit breaker statistics.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    /// Counts in the current rolling window.
    pub window: WindowSnapshot,
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_timeouts: u64,
    pub total_rejections: u64,
}

impl CircuitBreakerStats {
    /// Rolling error rate (0.0 - 100.0).
    pub fn error_rate(&self) -> f64 {
        self.window.error_rate()
    }

    /// Lifetime success rate (0.0 - 1.0).
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.total_successes as f64 / self.total_requests as f64
        }
    }
}
