//! Timeout pattern for operations.
//!
//! [`TimeoutController`] races an operation against a deadline. On expiry the
//! operation future is dropped, or, for [`execute_cancellable`], its
//! [`CancellationToken`] is cancelled. The call fails with
//! [`ResilienceError::Timeout`] either way.
//!
//! With [`AdaptiveTimeoutConfig`] the deadline follows observed latency:
//! `clamp(p95(last N durations) * 1.2, min, max)`, once enough samples exist.
//!
//! [`execute_cancellable`]: TimeoutController::execute_cancellable
//!
//! ## Example
//!
//! ```rust,ignore
//! use keelson::resilience::{AdaptiveTimeoutConfig, TimeoutConfig, TimeoutController};
//! use std::time::Duration;
//!
//! let timeout = TimeoutController::new(
//!     TimeoutConfig::new(Duration::from_secs(5))
//!         .name("search")
//!         .adaptive(AdaptiveTimeoutConfig::new(Duration::from_millis(200), Duration::from_secs(5))),
//! );
//!
//! let hits = timeout.execute_cancellable(|token| async move {
//!     search.query(q, token).await.map_err(Error::operation)
//! }, None).await?;
//! ```

use crate::error::ResilienceError;
use crate::events::{self, EventBus, EventKind};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Adaptive deadline settings.
#[derive(Debug, Clone)]
pub struct AdaptiveTimeoutConfig {
    /// Number of recent durations kept.
    pub sample_size: usize,
    /// Samples required before the adaptive deadline applies.
    pub min_samples: usize,
    pub percentile: f64,
    pub multiplier: f64,
    pub min_timeout: Duration,
    pub max_timeout: Duration,
}

impl Default for AdaptiveTimeoutConfig {
    fn default() -> Self {
        Self {
            sample_size: 100,
            min_samples: 10,
            percentile: 95.0,
            multiplier: 1.2,
            min_timeout: Duration::from_millis(100),
            max_timeout: Duration::from_secs(30),
        }
    }
}

impl AdaptiveTimeoutConfig {
    /// Bounds given in the wrong order are swapped.
    pub fn new(min_timeout: Duration, max_timeout: Duration) -> Self {
        Self {
            min_timeout: min_timeout.min(max_timeout),
            max_timeout: max_timeout.max(min_timeout),
            ..Default::default()
        }
    }

    pub fn sample_size(mut self, size: usize) -> Self {
        self.sample_size = size.max(1);
        self
    }

    /// Scale applied to the observed percentile. Values that are not
    /// finite and positive are ignored.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        if multiplier.is_finite() && multiplier > 0.0 {
            self.multiplier = multiplier;
        }
        self
    }

    /// Deadline for an observed percentile. Falls back to the upper bound
    /// when the scaled value is not representable.
    fn deadline(&self, observed: Duration) -> Duration {
        let lower = self.min_timeout.min(self.max_timeout);
        let upper = self.min_timeout.max(self.max_timeout);

        Duration::try_from_secs_f64(observed.as_secs_f64() * self.multiplier)
            .unwrap_or(upper)
            .clamp(lower, upper)
    }
}

/// Timeout configuration.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Name for logging/events.
    pub name: String,
    /// Static deadline, used when no per-call deadline is given.
    pub duration: Duration,
    pub adaptive: Option<AdaptiveTimeoutConfig>,
    pub events: Option<EventBus>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            duration: Duration::from_secs(30),
            adaptive: None,
            events: None,
        }
    }
}

impl TimeoutConfig {
    /// Create a new timeout configuration.
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            ..Default::default()
        }
    }

    /// Set the name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Derive the deadline from observed latency.
    pub fn adaptive(mut self, adaptive: AdaptiveTimeoutConfig) -> Self {
        self.adaptive = Some(adaptive);
        self
    }

    pub fn events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }
}

#[derive(Debug, Default)]
struct Latency {
    samples: VecDeque<Duration>,
    average_ms: f64,
    completed: u64,
    max_ms: u64,
}

/// Timeout executor.
pub struct TimeoutController {
    config: TimeoutConfig,
    latency: Mutex<Latency>,
    total_requests: AtomicU64,
    timed_out: AtomicU64,
}

impl TimeoutController {
    /// Create a new timeout executor.
    pub fn new(config: TimeoutConfig) -> Arc<Self> {
        debug!(
            name = %config.name,
            duration = ?config.duration,
            adaptive = config.adaptive.is_some(),
            "Timeout controller initialized"
        );

        Arc::new(Self {
            config,
            latency: Mutex::new(Latency::default()),
            total_requests: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
        })
    }

    /// Create with a duration.
    pub fn with_duration(duration: Duration) -> Arc<Self> {
        Self::new(TimeoutConfig::new(duration))
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The deadline the next call gets when none is passed explicitly.
    pub fn current_timeout(&self) -> Duration {
        let Some(adaptive) = &self.config.adaptive else {
            return self.config.duration;
        };

        let latency = self.latency.lock();
        if latency.samples.len() < adaptive.min_samples {
            return self.config.duration;
        }

        let p = percentile(latency.samples.iter().copied(), adaptive.percentile);
        adaptive.deadline(p)
    }

    /// Execute with a deadline. `None` uses [`current_timeout`](Self::current_timeout).
    pub async fn execute<F, Fut, T, E>(&self, op: F, timeout: Option<Duration>) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<ResilienceError>,
    {
        let limit = timeout.unwrap_or_else(|| self.current_timeout());
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        match tokio::time::timeout(limit, op()).await {
            Ok(result) => {
                self.record(started.elapsed());
                result
            }
            Err(_) => Err(self.expired(limit).into()),
        }
    }

    /// Execute with a deadline, handing the operation a token that is
    /// cancelled when the deadline passes.
    pub async fn execute_cancellable<F, Fut, T, E>(
        &self,
        op: F,
        timeout: Option<Duration>,
    ) -> Result<T, E>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<ResilienceError>,
    {
        let token = CancellationToken::new();
        let _cancel_on_exit = token.clone().drop_guard();

        self.execute(|| op(token), timeout).await
    }

    fn expired(&self, limit: Duration) -> ResilienceError {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
        warn!(
            name = %self.config.name,
            duration = ?limit,
            "Operation timed out"
        );
        events::emit(
            &self.config.events,
            &self.config.name,
            EventKind::Timeout {
                timeout_ms: limit.as_millis() as u64,
            },
        );

        ResilienceError::Timeout { after: limit }
    }

    fn record(&self, elapsed: Duration) {
        let mut latency = self.latency.lock();
        let ms = elapsed.as_millis() as u64;

        latency.completed += 1;
        latency.average_ms += (ms as f64 - latency.average_ms) / latency.completed as f64;
        latency.max_ms = latency.max_ms.max(ms);

        if let Some(adaptive) = &self.config.adaptive {
            if latency.samples.len() >= adaptive.sample_size {
                latency.samples.pop_front();
            }
            latency.samples.push_back(elapsed);
        }
    }

    /// Get timeout statistics.
    pub fn stats(&self) -> TimeoutStats {
        let latency = self.latency.lock();
        TimeoutStats {
            name: self.config.name.clone(),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            average_execution_ms: latency.average_ms,
            max_execution_ms: latency.max_ms,
            samples: latency.samples.len(),
        }
    }
}

/// Timeout statistics.
#[derive(Debug, Clone)]
pub struct TimeoutStats {
    pub name: String,
    pub total_requests: u64,
    pub timed_out: u64,
    /// Running average over completed (not timed-out) calls.
    pub average_execution_ms: f64,
    pub max_execution_ms: u64,
    /// Latency samples held for the adaptive deadline.
    pub samples: usize,
}

/// Nearest-rank percentile. Selects in place on a copy instead of sorting.
fn percentile(samples: impl Iterator<Item = Duration>, pct: f64) -> Duration {
    let mut values: Vec<Duration> = samples.collect();
    if values.is_empty() {
        return Duration::ZERO;
    }

    let rank = ((pct / 100.0) * values.len() as f64).ceil() as usize;
    let index = rank.clamp(1, values.len()) - 1;
    *values.select_nth_unstable(index).1
}

/// Execute a future with a timeout.
pub async fn with_timeout<Fut, T>(duration: Duration, fut: Fut) -> Result<T, ResilienceError>
where
    Fut: Future<Output = T>,
{
    tokio::time::timeout(duration, fut)
        .await
        .map_err(|_| ResilienceError::Timeout { after: duration })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[tokio::test(start_paused = true)]
    async fn test_timeout_completes() {
        let timeout = TimeoutController::with_duration(Duration::from_secs(1));

        let result: Result<i32, Error> = timeout.execute(|| async { Ok(42) }, None).await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(timeout.stats().timed_out, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_expires() {
        let timeout = TimeoutController::with_duration(Duration::from_secs(10));

        let result: Result<i32, Error> = timeout
            .execute(
                || async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(42)
                },
                Some(Duration::from_millis(10)),
            )
            .await;

        assert!(result.unwrap_err().is_timeout());
        let stats = timeout.stats();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.timed_out, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_error_passes_through() {
        let timeout = TimeoutController::with_duration(Duration::from_secs(1));

        let result: Result<(), Error> = timeout
            .execute(|| async { Err(Error::operation("refused")) }, None)
            .await;

        assert!(matches!(result, Err(Error::Operation(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_cancelled_on_expiry() {
        let timeout = TimeoutController::with_duration(Duration::from_millis(50));
        let observed = CancellationToken::new();

        let seen = observed.clone();
        let result: Result<(), Error> = timeout
            .execute_cancellable(
                |token| async move {
                    let watcher = token.clone();
                    tokio::spawn(async move {
                        watcher.cancelled().await;
                        seen.cancel();
                    });
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                },
                None,
            )
            .await;

        assert!(result.unwrap_err().is_timeout());
        tokio::time::timeout(Duration::from_secs(1), observed.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_metrics_track_average_and_max() {
        let timeout = TimeoutController::with_duration(Duration::from_secs(1));

        for ms in [100, 300] {
            let _: Result<(), Error> = timeout
                .execute(
                    || async move {
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                        Ok(())
                    },
                    None,
                )
                .await;
        }

        let stats = timeout.stats();
        assert_eq!(stats.max_execution_ms, 300);
        assert!((stats.average_execution_ms - 200.0).abs() < 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_adaptive_needs_min_samples() {
        let timeout = TimeoutController::new(
            TimeoutConfig::new(Duration::from_secs(5))
                .adaptive(AdaptiveTimeoutConfig::new(Duration::from_millis(10), Duration::from_secs(10))),
        );

        for _ in 0..9 {
            let _: Result<(), Error> = timeout
                .execute(
                    || async {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(())
                    },
                    None,
                )
                .await;
        }
        assert_eq!(timeout.current_timeout(), Duration::from_secs(5));

        let _: Result<(), Error> = timeout
            .execute(
                || async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(())
                },
                None,
            )
            .await;
        assert_eq!(timeout.current_timeout(), Duration::from_millis(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_adaptive_clamps_to_bounds() {
        let timeout = TimeoutController::new(
            TimeoutConfig::new(Duration::from_secs(5))
                .adaptive(AdaptiveTimeoutConfig::new(Duration::from_millis(500), Duration::from_secs(10))),
        );

        for _ in 0..10 {
            let _: Result<(), Error> = timeout
                .execute(
                    || async {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(())
                    },
                    None,
                )
                .await;
        }

        assert_eq!(timeout.current_timeout(), Duration::from_millis(500));
    }

    async fn run_for(timeout: &TimeoutController, duration: Duration, calls: usize) {
        for _ in 0..calls {
            let _: Result<(), Error> = timeout
                .execute(
                    || async move {
                        tokio::time::sleep(duration).await;
                        Ok(())
                    },
                    None,
                )
                .await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_adaptive_forgets_old_samples() {
        let timeout = TimeoutController::new(
            TimeoutConfig::new(Duration::from_secs(5)).adaptive(
                AdaptiveTimeoutConfig::new(Duration::from_millis(10), Duration::from_secs(10))
                    .sample_size(10),
            ),
        );

        run_for(&timeout, Duration::from_secs(2), 10).await;
        assert!(timeout.current_timeout() >= Duration::from_secs(2));

        // One slow sample still in the window keeps the deadline high.
        run_for(&timeout, Duration::from_millis(100), 9).await;
        assert!(timeout.current_timeout() >= Duration::from_secs(2));

        run_for(&timeout, Duration::from_millis(100), 1).await;
        let current = timeout.current_timeout();
        assert!(current >= Duration::from_millis(100));
        assert!(current < Duration::from_millis(200));
        assert_eq!(timeout.stats().samples, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_adaptive_reversed_bounds() {
        let adaptive = AdaptiveTimeoutConfig::new(Duration::from_secs(5), Duration::from_secs(2));
        assert_eq!(adaptive.min_timeout, Duration::from_secs(2));
        assert_eq!(adaptive.max_timeout, Duration::from_secs(5));

        let timeout = TimeoutController::new(TimeoutConfig::new(Duration::from_secs(1)).adaptive(adaptive));
        run_for(&timeout, Duration::from_millis(100), 10).await;

        assert_eq!(timeout.current_timeout(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_adaptive_invalid_multiplier() {
        let ignored = AdaptiveTimeoutConfig::default().multiplier(-1.0).multiplier(f64::NAN);
        assert_eq!(ignored.multiplier, 1.2);

        let mut adaptive = AdaptiveTimeoutConfig::new(Duration::from_millis(10), Duration::from_secs(3));
        adaptive.multiplier = f64::NAN;
        adaptive.min_timeout = Duration::from_secs(4);

        let timeout = TimeoutController::new(TimeoutConfig::new(Duration::from_secs(1)).adaptive(adaptive));
        run_for(&timeout, Duration::from_millis(100), 10).await;

        assert_eq!(timeout.current_timeout(), Duration::from_secs(4));
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let samples = (1..=100).map(Duration::from_millis);
        assert_eq!(percentile(samples, 95.0), Duration::from_millis(95));

        let few = [30, 10, 20].into_iter().map(Duration::from_millis);
        assert_eq!(percentile(few, 95.0), Duration::from_millis(30));

        assert_eq!(percentile(std::iter::empty(), 95.0), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_helper() {
        let fast = with_timeout(Duration::from_secs(1), async { 7 }).await;
        assert_eq!(fast.unwrap(), 7);

        let slow = with_timeout(Duration::from_millis(5), tokio::time::sleep(Duration::from_secs(1))).await;
        assert!(slow.unwrap_err().is_timeout());
    }
}
