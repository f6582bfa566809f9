//! Retry pattern with configurable backoff strategies.
//!
//! Failed attempts are retried only when the error is judged transient
//! (see [`default_should_retry`]); anything else propagates at once. When
//! attempts run out the last error is returned unchanged.
//!
//! ## Example
//!
//! ```rust,ignore
//! use keelson::resilience::{BackoffStrategy, RetryConfig, RetryController};
//! use std::time::Duration;
//!
//! let retry = RetryController::new(
//!     RetryConfig::new(5)
//!         .name("inventory")
//!         .backoff(BackoffStrategy::exponential(Duration::from_millis(100)).with_max(Duration::from_secs(5)))
//!         .on_retry(|err, attempt| tracing::info!(attempt, error = %err, "retrying")),
//! );
//!
//! let stock = retry.execute(|| async { inventory.fetch(sku).await }).await?;
//! ```

use crate::error::{Error, HttpStatusError, ResilienceError};
use crate::events::{self, EventBus, EventKind};
use rand::Rng;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Decides whether a failed attempt should be retried.
pub type RetryPredicate = Arc<dyn Fn(&(dyn std::error::Error + 'static)) -> bool + Send + Sync>;

/// Observer invoked with the error and the number of the failed attempt.
pub type RetryCallback = Arc<dyn Fn(&(dyn std::error::Error + 'static), u32) + Send + Sync>;

/// Errno-style codes that mark a failure as transient.
const TRANSIENT_CODES: [&str; 8] = [
    "ECONNRESET",
    "ECONNREFUSED",
    "ETIMEDOUT",
    "EPIPE",
    "ENOTFOUND",
    "ENETUNREACH",
    "EAI_AGAIN",
    "EHOSTUNREACH",
];

/// Backoff strategy for retries.
#[derive(Debug, Clone)]
pub enum BackoffStrategy {
    /// No delay between retries.
    None,
    /// Constant delay between retries.
    Constant(Duration),
    /// Linear backoff: delay increases by a fixed amount.
    Linear {
        initial: Duration,
        increment: Duration,
        max: Duration,
    },
    /// Exponential backoff: `initial * multiplier^n`.
    Exponential {
        initial: Duration,
        multiplier: f64,
        max: Duration,
    },
}

impl BackoffStrategy {
    /// Create constant backoff.
    pub fn constant(delay: Duration) -> Self {
        Self::Constant(delay)
    }

    /// Create linear backoff.
    pub fn linear(initial: Duration, increment: Duration) -> Self {
        Self::Linear {
            initial,
            increment,
            max: Duration::from_secs(30),
        }
    }

    /// Create exponential backoff with a multiplier of 2.
    pub fn exponential(initial: Duration) -> Self {
        Self::Exponential {
            initial,
            multiplier: 2.0,
            max: Duration::from_secs(30),
        }
    }

    /// Set the exponential multiplier. No effect on other shapes.
    pub fn with_multiplier(self, multiplier: f64) -> Self {
        match self {
            Self::Exponential { initial, max, .. } => Self::Exponential {
                initial,
                multiplier,
                max,
            },
            other => other,
        }
    }

    /// Set maximum delay.
    pub fn with_max(self, max: Duration) -> Self {
        match self {
            Self::Linear {
                initial, increment, ..
            } => Self::Linear {
                initial,
                increment,
                max,
            },
            Self::Exponential {
                initial,
                multiplier,
                ..
            } => Self::Exponential {
                initial,
                multiplier,
                max,
            },
            other => other,
        }
    }

    /// Delay before the `retry`-th retry (0-indexed).
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Constant(d) => *d,
            Self::Linear {
                initial,
                increment,
                max,
            } => (*initial + increment.saturating_mul(retry)).min(*max),
            Self::Exponential {
                initial,
                multiplier,
                max,
            } => {
                let factor = multiplier.powi(retry.min(i32::MAX as u32) as i32);
                let nanos = initial.as_nanos() as f64 * factor;
                if !nanos.is_finite() || nanos >= max.as_nanos() as f64 {
                    *max
                } else {
                    Duration::from_nanos(nanos.max(0.0) as u64)
                }
            }
        }
    }
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::exponential(Duration::from_millis(100))
    }
}

/// Retry configuration.
#[derive(Clone)]
pub struct RetryConfig {
    /// Name for logging/events.
    pub name: String,
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
    /// Draw each delay uniformly from `[0, computed]`.
    pub jitter: bool,
    pub should_retry: RetryPredicate,
    pub on_retry: Option<RetryCallback>,
    pub events: Option<EventBus>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            max_attempts: 3,
            backoff: BackoffStrategy::default(),
            jitter: true,
            should_retry: Arc::new(default_should_retry),
            on_retry: None,
            events: None,
        }
    }
}

impl RetryConfig {
    /// Create new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the backoff strategy.
    pub fn backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Only retry errors matching the predicate.
    pub fn retry_on<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&(dyn std::error::Error + 'static)) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    /// Observe each failed attempt before its backoff delay.
    pub fn on_retry<F>(mut self, callback: F) -> Self
    where
        F: Fn(&(dyn std::error::Error + 'static), u32) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(callback));
        self
    }

    pub fn events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }
}

impl std::fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryConfig")
            .field("name", &self.name)
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

/// Default retry predicate: walks the error's source chain looking for a
/// transient failure.
pub fn default_should_retry(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(decision) = classify(err) {
            return decision;
        }
        current = err.source();
    }
    false
}

/// `Some` when the error settles the question, `None` to keep looking.
fn classify(err: &(dyn std::error::Error + 'static)) -> Option<bool> {
    if let Some(err) = err.downcast_ref::<ResilienceError>() {
        return Some(err.is_timeout());
    }

    if let Some(resilience) = err.downcast_ref::<Error>().and_then(Error::as_resilience) {
        return Some(resilience.is_timeout());
    }

    if let Some(http) = err.downcast_ref::<HttpStatusError>() {
        return Some(http.is_retryable());
    }

    if let Some(io) = err.downcast_ref::<io::Error>()
        && matches!(
            io.kind(),
            io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::NotConnected
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::TimedOut
                | io::ErrorKind::AddrNotAvailable
                | io::ErrorKind::HostUnreachable
                | io::ErrorKind::NetworkUnreachable
        )
    {
        return Some(true);
    }

    let message = err.to_string();
    if TRANSIENT_CODES.iter().any(|code| message.contains(code)) {
        return Some(true);
    }

    let message = message.to_lowercase();
    if message.contains("timeout") || message.contains("timed out") {
        return Some(true);
    }

    None
}

/// Retry executor.
#[derive(Debug, Clone)]
pub struct RetryController {
    config: RetryConfig,
}

impl RetryController {
    /// Create a new retry executor.
    pub fn new(config: RetryConfig) -> Self {
        debug!(
            name = %config.name,
            max_attempts = config.max_attempts,
            backoff = ?config.backoff,
            "Retry controller initialized"
        );
        Self { config }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Delay slept before attempt `attempt` (2 for the first retry).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        let computed = self
            .config
            .backoff
            .delay_for_attempt(attempt.saturating_sub(2));

        if !self.config.jitter || computed.is_zero() {
            return computed;
        }

        let ceiling = computed.as_millis().min(u64::MAX as u128) as u64;
        Duration::from_millis(rand::rng().random_range(0..=ceiling))
    }

    /// Execute with retry logic.
    pub async fn execute<F, Fut, T, E>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let err = match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(name = %self.config.name, attempt, "Retry succeeded");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            let source: &(dyn std::error::Error + 'static) = &err;
            if !(self.config.should_retry)(source) {
                debug!(
                    name = %self.config.name,
                    attempt,
                    error = %err,
                    "Error is not retryable"
                );
                return Err(err);
            }

            if attempt >= max_attempts {
                warn!(
                    name = %self.config.name,
                    attempts = attempt,
                    error = %err,
                    "Final retry attempt failed"
                );
                events::emit(
                    &self.config.events,
                    &self.config.name,
                    EventKind::Exhausted {
                        attempts: attempt,
                        error: err.to_string(),
                    },
                );
                return Err(err);
            }

            let delay = self.delay_before(attempt + 1);

            if let Some(callback) = &self.config.on_retry {
                callback(source, attempt);
            }

            debug!(
                name = %self.config.name,
                attempt,
                delay = ?delay,
                error = %err,
                "Retry attempt failed, waiting before retry"
            );
            events::emit(
                &self.config.events,
                &self.config.name,
                EventKind::Retry {
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                    error: err.to_string(),
                },
            );

            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }
}
