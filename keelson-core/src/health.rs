//! Health check aggregation for liveness and readiness probes.
//!
//! A [`HealthCheckRegistry`] holds named probes. Each probe runs under its own
//! timeout; probes with an interval also re-run periodically on their own
//! task. The latest result of every probe is cached and aggregated into a
//! [`HealthReport`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use keelson::health::{HealthCheckDescriptor, HealthCheckRegistry, HealthCheckResult};
//! use std::time::Duration;
//!
//! let registry = HealthCheckRegistry::new(HealthRegistryConfig::new(env!("CARGO_PKG_VERSION")));
//!
//! registry.register(
//!     HealthCheckDescriptor::from_fn("database", || async {
//!         pool.ping().await?;
//!         Ok(HealthCheckResult::healthy())
//!     })
//!     .critical(true)
//!     .interval(Duration::from_secs(15)),
//! );
//!
//! let report = registry.get_health().await;
//! let status = report.status.http_status_code();
//! ```
//!
//! ## Aggregation
//!
//! - **unhealthy** if any critical check is unhealthy
//! - **degraded** if any other check is unhealthy or degraded
//! - **healthy** otherwise, including when nothing is registered
//!
//! ## Probe Endpoints
//!
//! Hosts typically map `GET /live` to [`HealthCheckRegistry::liveness`] and
//! `GET /ready` / `GET /health` to [`HealthCheckRegistry::get_health`].

use crate::error::BoxError;
use crate::events::{self, EventBus, EventKind};
use crate::shutdown::ShutdownHandler;
use async_trait::async_trait;
use futures_util::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Health status of a single check or the whole service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Healthy,
    /// Functioning with reduced capability.
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Returns true if the service can still take traffic
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }

    /// Returns the HTTP status code for this health status
    pub fn http_status_code(&self) -> u16 {
        match self {
            HealthStatus::Healthy => 200,
            HealthStatus::Degraded => 200,
            HealthStatus::Unhealthy => 503,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Latest result of one check.
///
/// Probes build a result with [`healthy`](Self::healthy),
/// [`degraded`](Self::degraded) or [`unhealthy`](Self::unhealthy); the
/// registry fills in the name, duration, timestamp and criticality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResult {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub duration_ms: u64,
    /// Unix timestamp in seconds
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
    pub critical: bool,
}

impl HealthCheckResult {
    fn with_status(status: HealthStatus, message: Option<String>) -> Self {
        Self {
            name: String::new(),
            status,
            message,
            duration_ms: 0,
            timestamp: current_timestamp(),
            metadata: HashMap::new(),
            critical: false,
        }
    }

    pub fn healthy() -> Self {
        Self::with_status(HealthStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_status(HealthStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_status(HealthStatus::Unhealthy, Some(message.into()))
    }

    /// Sets a message on any status
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Adds a free-form metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A health probe.
///
/// ## Example
///
/// ```rust
/// use keelson_core::error::BoxError;
/// use keelson_core::health::{HealthCheck, HealthCheckResult};
/// use async_trait::async_trait;
///
/// struct QueueDepth {
///     limit: usize,
/// }
///
/// #[async_trait]
/// impl HealthCheck for QueueDepth {
///     async fn check(&self) -> Result<HealthCheckResult, BoxError> {
///         let depth = 12; // read from the broker in a real probe
///         let result = if depth > self.limit {
///             HealthCheckResult::degraded("queue backing up")
///         } else {
///             HealthCheckResult::healthy()
///         };
///         Ok(result.with_metadata("depth", depth))
///     }
/// }
/// ```
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Run the probe. An `Err` is reported as unhealthy with its message.
    async fn check(&self) -> Result<HealthCheckResult, BoxError>;
}

struct FnHealthCheck<F>(F);

#[async_trait]
impl<F, Fut> HealthCheck for FnHealthCheck<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HealthCheckResult, BoxError>> + Send + 'static,
{
    async fn check(&self) -> Result<HealthCheckResult, BoxError> {
        (self.0)().await
    }
}

/// A named probe plus how it is run.
#[derive(Clone)]
pub struct HealthCheckDescriptor {
    pub name: String,
    check: Arc<dyn HealthCheck>,
    /// An unhealthy critical check makes the whole service unhealthy.
    pub critical: bool,
    pub timeout: Duration,
    /// Re-run period. `None` runs only on demand.
    pub interval: Option<Duration>,
}

impl HealthCheckDescriptor {
    /// Default per-check timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

    pub fn new(name: impl Into<String>, check: impl HealthCheck + 'static) -> Self {
        Self {
            name: name.into(),
            check: Arc::new(check),
            critical: false,
            timeout: Self::DEFAULT_TIMEOUT,
            interval: None,
        }
    }

    /// Build a descriptor from an async closure.
    pub fn from_fn<F, Fut>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HealthCheckResult, BoxError>> + Send + 'static,
    {
        Self::new(name, FnHealthCheck(check))
    }

    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Re-run the check periodically. A zero period leaves it on demand.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = (!interval.is_zero()).then_some(interval);
        self
    }

    /// Run the probe once under its timeout.
    ///
    /// Never fails: errors and timeouts become an unhealthy result.
    pub async fn run(&self) -> HealthCheckResult {
        let started = Instant::now();

        let mut result = match tokio::time::timeout(self.timeout, self.check.check()).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => HealthCheckResult::unhealthy(e.to_string()),
            Err(_) => HealthCheckResult::unhealthy(format!(
                "Health check timed out after {}ms",
                self.timeout.as_millis()
            )),
        };

        result.name = self.name.clone();
        result.critical = self.critical;
        result.duration_ms = started.elapsed().as_millis() as u64;
        result.timestamp = current_timestamp();
        result
    }
}

impl std::fmt::Debug for HealthCheckDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthCheckDescriptor")
            .field("name", &self.name)
            .field("critical", &self.critical)
            .field("timeout", &self.timeout)
            .field("interval", &self.interval)
            .finish()
    }
}

/// Aggregated health of the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub uptime_secs: u64,
    pub version: String,
    /// Latest result per check, sorted by name
    pub checks: Vec<HealthCheckResult>,
    /// Unix timestamp in seconds
    pub timestamp: u64,
}

impl HealthReport {
    /// Get the result of a single check.
    pub fn check(&self, name: &str) -> Option<&HealthCheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }
}

/// Combine check results into one verdict.
pub fn aggregate_status(results: &[HealthCheckResult]) -> HealthStatus {
    if results
        .iter()
        .any(|r| r.critical && r.status == HealthStatus::Unhealthy)
    {
        HealthStatus::Unhealthy
    } else if results.iter().any(|r| r.status != HealthStatus::Healthy) {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct HealthRegistryConfig {
    /// Version tag reported in every [`HealthReport`].
    pub version: String,
    pub events: Option<EventBus>,
}

impl Default for HealthRegistryConfig {
    fn default() -> Self {
        Self {
            version: "unknown".to_string(),
            events: None,
        }
    }
}

impl HealthRegistryConfig {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            ..Default::default()
        }
    }

    pub fn events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }
}

struct RegisteredCheck {
    descriptor: HealthCheckDescriptor,
    cancel: Option<CancellationToken>,
}

/// Registry of named health checks.
pub struct HealthCheckRegistry {
    config: HealthRegistryConfig,
    checks: RwLock<HashMap<String, RegisteredCheck>>,
    results: RwLock<HashMap<String, HealthCheckResult>>,
    started_at: Instant,
    stopped: CancellationToken,
}

impl HealthCheckRegistry {
    pub fn new(config: HealthRegistryConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            checks: RwLock::new(HashMap::new()),
            results: RwLock::new(HashMap::new()),
            started_at: Instant::now(),
            stopped: CancellationToken::new(),
        })
    }

    /// Register a check, replacing any check with the same name.
    ///
    /// Checks with an interval start running immediately on a spawned task,
    /// so this must be called within a Tokio runtime for those.
    pub fn register(self: &Arc<Self>, descriptor: HealthCheckDescriptor) {
        let name = descriptor.name.clone();

        if descriptor.interval.is_some_and(|interval| interval.is_zero()) {
            warn!(check = %name, "Ignoring zero health check interval");
        }

        let cancel = descriptor.interval.filter(|i| !i.is_zero()).map(|interval| {
            let token = self.stopped.child_token();
            self.spawn_periodic(descriptor.clone(), interval, token.clone());
            token
        });

        info!(
            check = %name,
            critical = descriptor.critical,
            interval = ?descriptor.interval,
            "Health check registered"
        );

        let previous = self
            .checks
            .write()
            .insert(name.clone(), RegisteredCheck { descriptor, cancel });

        if let Some(previous) = previous {
            debug!(check = %name, "Replaced existing health check");
            if let Some(token) = previous.cancel {
                token.cancel();
            }
        }
    }

    /// Remove a check and stop its periodic task. Returns whether it existed.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.checks.write().remove(name);
        self.results.write().remove(name);

        match removed {
            Some(check) => {
                if let Some(token) = check.cancel {
                    token.cancel();
                }
                info!(check = %name, "Health check unregistered");
                true
            }
            None => false,
        }
    }

    /// Number of registered checks.
    pub fn check_count(&self) -> usize {
        self.checks.read().len()
    }

    /// Run every check now and aggregate the results.
    pub async fn get_health(&self) -> HealthReport {
        let descriptors: Vec<_> = self
            .checks
            .read()
            .values()
            .map(|c| c.descriptor.clone())
            .collect();

        let results = join_all(descriptors.iter().map(|d| self.run_check(d))).await;
        self.report(results)
    }

    /// Aggregate the latest cached results without running anything.
    pub async fn get_cached_health(&self) -> HealthReport {
        let results = {
            let checks = self.checks.read();
            self.results
                .read()
                .values()
                .filter(|r| checks.contains_key(&r.name))
                .cloned()
                .collect()
        };
        self.report(results)
    }

    /// Liveness: the process is up and answering.
    pub fn liveness(&self) -> HealthReport {
        self.report(Vec::new())
    }

    /// Readiness: every check, run now.
    pub async fn readiness(&self) -> HealthReport {
        self.get_health().await
    }

    /// Stop all periodic checks.
    pub fn stop(&self) {
        if !self.stopped.is_cancelled() {
            info!(checks = self.check_count(), "Stopping periodic health checks");
            self.stopped.cancel();
        }
    }

    /// Shutdown handler that stops periodic checks.
    pub fn shutdown_handler(self: &Arc<Self>, priority: i32) -> ShutdownHandler {
        let registry = Arc::downgrade(self);

        ShutdownHandler::new("health-checks", move || {
            let registry = registry.clone();
            async move {
                if let Some(registry) = registry.upgrade() {
                    registry.stop();
                }
                Ok(())
            }
        })
        .priority(priority)
    }

    async fn run_check(&self, descriptor: &HealthCheckDescriptor) -> HealthCheckResult {
        let result = descriptor.run().await;

        if result.status != HealthStatus::Healthy {
            warn!(
                check = %result.name,
                status = %result.status,
                message = ?result.message,
                "Health check not healthy"
            );
        }
        events::emit(
            &self.config.events,
            &result.name,
            EventKind::CheckCompleted {
                check: result.name.clone(),
                status: result.status.to_string(),
            },
        );

        // Skip storing results of checks removed while running.
        if self.checks.read().contains_key(&result.name) {
            self.results
                .write()
                .insert(result.name.clone(), result.clone());
        }

        result
    }

    fn spawn_periodic(
        self: &Arc<Self>,
        descriptor: HealthCheckDescriptor,
        interval: Duration,
        token: CancellationToken,
    ) {
        let registry: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(registry) = registry.upgrade() else {
                            break;
                        };
                        registry.run_check(&descriptor).await;
                    }
                }
            }

            debug!(check = %descriptor.name, "Periodic health check stopped");
        });
    }

    fn report(&self, mut checks: Vec<HealthCheckResult>) -> HealthReport {
        checks.sort_by(|a, b| a.name.cmp(&b.name));

        HealthReport {
            status: aggregate_status(&checks),
            uptime_secs: self.started_at.elapsed().as_secs(),
            version: self.config.version.clone(),
            checks,
            timestamp: current_timestamp(),
        }
    }
}

impl Drop for HealthCheckRegistry {
    fn drop(&mut self) {
        self.stopped.cancel();
    }
}

/// Returns the current Unix timestamp in seconds
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
