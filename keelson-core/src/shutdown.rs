//! Coordinated graceful shutdown
//!
//! Components register cleanup handlers with a [`ShutdownCoordinator`]. The
//! first trigger (signal, panic, or a manual call) freezes registration and
//! runs the handlers in descending priority under a global deadline.
//!
//! # Features
//!
//! - **Priority batches** - Higher priority first; equal priorities run concurrently
//! - **Per-handler timeouts** - On top of the global deadline
//! - **Idempotent** - Concurrent triggers all receive the same report
//! - **Signal Handling** - SIGINT, SIGTERM, SIGUSR2 (Ctrl-C elsewhere)
//! - **Panic trigger** - Emergency shutdown with half the deadline
//!
//! # Quick Start
//!
//! ```no_run
//! use keelson_core::shutdown::{ShutdownConfig, ShutdownCoordinator, ShutdownHandler};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let coordinator = ShutdownCoordinator::new(ShutdownConfig::default());
//!
//! coordinator.register(
//!     ShutdownHandler::new("http-server", || async {
//!         println!("Draining connections...");
//!         Ok(())
//!     })
//!     .priority(100)
//!     .timeout(Duration::from_secs(10)),
//! )?;
//!
//! coordinator.listen_for_signals();
//! # Ok(())
//! # }
//! ```

use crate::error::{BoxError, ResilienceError};
use crate::events::{self, EventBus, EventKind};
use futures_util::FutureExt;
use futures_util::future::join_all;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Async cleanup function run during shutdown.
pub type ShutdownFn =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>> + Send + Sync>;

/// A named cleanup step.
#[derive(Clone)]
pub struct ShutdownHandler {
    pub name: String,
    handler: ShutdownFn,
    /// Bound on this handler alone. The global deadline always applies.
    pub timeout: Option<Duration>,
    /// Higher runs earlier.
    pub priority: i32,
}

impl ShutdownHandler {
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            handler: Arc::new(move || Box::pin(handler())),
            timeout: None,
            priority: 0,
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl std::fmt::Debug for ShutdownHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownHandler")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// OS signals that trigger a graceful shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT / Ctrl-C
    Interrupt,
    /// SIGTERM
    Terminate,
    /// SIGUSR2
    User2,
}

#[cfg(unix)]
impl ShutdownSignal {
    fn kind(self) -> tokio::signal::unix::SignalKind {
        use tokio::signal::unix::SignalKind;
        match self {
            Self::Interrupt => SignalKind::interrupt(),
            Self::Terminate => SignalKind::terminate(),
            Self::User2 => SignalKind::user_defined2(),
        }
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Global deadline. Halved for emergency shutdowns.
    pub timeout: Duration,
    /// Exit the process with status 1 when the deadline is exceeded.
    pub force_exit: bool,
    /// Delay between logging the forced exit and exiting.
    pub exit_grace: Duration,
    pub signals: Vec<ShutdownSignal>,
    pub events: Option<EventBus>,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            force_exit: false,
            exit_grace: Duration::from_secs(1),
            signals: vec![
                ShutdownSignal::Interrupt,
                ShutdownSignal::Terminate,
                ShutdownSignal::User2,
            ],
            events: None,
        }
    }
}

impl ShutdownConfig {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn force_exit(mut self, enable: bool) -> Self {
        self.force_exit = enable;
        self
    }

    pub fn exit_grace(mut self, grace: Duration) -> Self {
        self.exit_grace = grace;
        self
    }

    pub fn signals(mut self, signals: Vec<ShutdownSignal>) -> Self {
        self.signals = signals;
        self
    }

    pub fn events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }
}

/// Outcome of one handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerOutcome {
    pub name: String,
    pub priority: i32,
    pub success: bool,
    pub duration: Duration,
    pub error: Option<String>,
}

/// Outcome of a shutdown run.
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    /// Every handler succeeded within the deadline.
    pub success: bool,
    pub emergency: bool,
    /// The global deadline was exceeded.
    pub timed_out: bool,
    /// Deadline in force for this run.
    pub deadline: Duration,
    pub duration: Duration,
    /// In completion order; handlers cut off by the deadline come last.
    pub handlers: Vec<HandlerOutcome>,
}

impl ShutdownReport {
    /// Get the outcome of a single handler.
    pub fn handler(&self, name: &str) -> Option<&HandlerOutcome> {
        self.handlers.iter().find(|h| h.name == name)
    }

    /// Convert a failed run into an error.
    pub fn into_result(self) -> Result<(), ResilienceError> {
        if self.timed_out {
            return Err(ResilienceError::ShutdownTimedOut {
                after: self.deadline,
            });
        }

        match self.handlers.into_iter().find(|h| !h.success) {
            Some(failed) => Err(ResilienceError::ShutdownHandlerFailed {
                name: failed.name,
                message: failed.error.unwrap_or_default(),
            }),
            None => Ok(()),
        }
    }
}

/// Runs registered cleanup handlers once, in priority order.
pub struct ShutdownCoordinator {
    config: ShutdownConfig,
    handlers: Mutex<Vec<ShutdownHandler>>,
    shutting_down: AtomicBool,
    report: OnceCell<ShutdownReport>,
    finished: Notify,
}

impl ShutdownCoordinator {
    pub fn new(config: ShutdownConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            handlers: Mutex::new(Vec::new()),
            shutting_down: AtomicBool::new(false),
            report: OnceCell::new(),
            finished: Notify::new(),
        })
    }

    /// Register a handler, replacing any handler with the same name.
    ///
    /// Fails with [`ResilienceError::RegistrationClosed`] once shutdown has
    /// started.
    pub fn register(&self, handler: ShutdownHandler) -> Result<(), ResilienceError> {
        let mut handlers = self.handlers.lock();
        if self.shutting_down.load(Ordering::Acquire) {
            warn!(handler = %handler.name, "Rejected shutdown handler registration during shutdown");
            return Err(ResilienceError::RegistrationClosed { name: handler.name });
        }

        info!(handler = %handler.name, priority = handler.priority, "Shutdown handler registered");
        handlers.retain(|h| h.name != handler.name);
        handlers.push(handler);
        Ok(())
    }

    /// Remove a handler. Returns whether it existed.
    pub fn unregister(&self, name: &str) -> bool {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|h| h.name != name);
        handlers.len() != before
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Check if shutdown has been initiated
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Report of the finished run, if any.
    pub fn report(&self) -> Option<ShutdownReport> {
        self.report.get().cloned()
    }

    /// Run every handler once.
    ///
    /// The run happens on its own task, so dropping the returned future does
    /// not interrupt it. Concurrent and repeated calls await the first run
    /// and receive its report. With `force_exit` configured, exceeding the
    /// deadline terminates the process instead of returning.
    pub async fn shutdown(self: &Arc<Self>, emergency: bool) -> ShutdownReport {
        let first = {
            // Registration checks the flag under the same lock.
            let _handlers = self.handlers.lock();
            !self.shutting_down.swap(true, Ordering::AcqRel)
        };

        if first {
            let coordinator = Arc::clone(self);
            tokio::spawn(async move {
                let report = match AssertUnwindSafe(coordinator.run(emergency))
                    .catch_unwind()
                    .await
                {
                    Ok(report) => report,
                    Err(_) => {
                        error!("Shutdown run panicked");
                        ShutdownReport {
                            success: false,
                            emergency,
                            timed_out: false,
                            deadline: coordinator.deadline(emergency),
                            duration: Duration::ZERO,
                            handlers: Vec::new(),
                        }
                    }
                };
                let _ = coordinator.report.set(report);
                coordinator.finished.notify_waiters();
            });
        }

        loop {
            let finished = self.finished.notified();
            if let Some(report) = self.report.get() {
                return report.clone();
            }
            finished.await;
        }
    }

    fn deadline(&self, emergency: bool) -> Duration {
        if emergency {
            self.config.timeout / 2
        } else {
            self.config.timeout
        }
    }

    async fn run(&self, emergency: bool) -> ShutdownReport {
        let mut handlers = self.handlers.lock().clone();
        let deadline = self.deadline(emergency);

        info!(
            handlers = handlers.len(),
            deadline = ?deadline,
            emergency,
            "Initiating graceful shutdown"
        );
        self.emit(EventKind::ShutdownStarted { emergency });

        // Stable sort keeps registration order within a priority.
        handlers.sort_by(|a, b| b.priority.cmp(&a.priority));

        let started = Instant::now();
        let outcomes = Mutex::new(Vec::with_capacity(handlers.len()));

        let run_batches = async {
            for batch in handlers.chunk_by(|a, b| a.priority == b.priority) {
                join_all(batch.iter().map(|h| self.run_handler(h, &outcomes))).await;
            }
        };
        let timed_out = tokio::time::timeout(deadline, run_batches).await.is_err();

        let mut outcomes = outcomes.into_inner();
        if timed_out {
            error!(deadline = ?deadline, "Shutdown deadline exceeded");
            for handler in &handlers {
                if !outcomes.iter().any(|o| o.name == handler.name) {
                    outcomes.push(HandlerOutcome {
                        name: handler.name.clone(),
                        priority: handler.priority,
                        success: false,
                        duration: started.elapsed(),
                        error: Some("did not finish before the shutdown deadline".to_string()),
                    });
                }
            }
        }

        let report = ShutdownReport {
            success: !timed_out && outcomes.iter().all(|o| o.success),
            emergency,
            timed_out,
            deadline,
            duration: started.elapsed(),
            handlers: outcomes,
        };

        for outcome in report.handlers.iter().filter(|o| !o.success) {
            error!(
                handler = %outcome.name,
                error = outcome.error.as_deref().unwrap_or(""),
                "Shutdown handler failed"
            );
        }
        info!(
            success = report.success,
            duration = ?report.duration,
            "Shutdown complete"
        );
        self.emit(EventKind::ShutdownCompleted {
            success: report.success,
            duration_ms: report.duration.as_millis() as u64,
        });

        if timed_out && self.config.force_exit {
            error!(grace = ?self.config.exit_grace, "Forcing process exit");
            tokio::time::sleep(self.config.exit_grace).await;
            std::process::exit(1);
        }

        report
    }

    async fn run_handler(&self, handler: &ShutdownHandler, outcomes: &Mutex<Vec<HandlerOutcome>>) {
        let started = Instant::now();

        let call = AssertUnwindSafe((handler.handler)())
            .catch_unwind()
            .map(|result| result.unwrap_or_else(|_| Err("handler panicked".into())));

        let result = match handler.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or_else(|_| Err(format!("timed out after {:?}", limit).into())),
            None => call.await,
        };

        let duration = started.elapsed();
        let outcome = match result {
            Ok(()) => {
                info!(handler = %handler.name, duration = ?duration, "Shutdown handler completed");
                self.emit(EventKind::HandlerCompleted {
                    handler: handler.name.clone(),
                    duration_ms: duration.as_millis() as u64,
                });
                HandlerOutcome {
                    name: handler.name.clone(),
                    priority: handler.priority,
                    success: true,
                    duration,
                    error: None,
                }
            }
            Err(e) => {
                self.emit(EventKind::HandlerFailed {
                    handler: handler.name.clone(),
                    error: e.to_string(),
                });
                HandlerOutcome {
                    name: handler.name.clone(),
                    priority: handler.priority,
                    success: false,
                    duration,
                    error: Some(e.to_string()),
                }
            }
        };

        outcomes.lock().push(outcome);
    }

    /// Trigger a graceful shutdown on the first configured OS signal.
    ///
    /// Must be called within a Tokio runtime.
    pub fn listen_for_signals(self: &Arc<Self>) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);

        tokio::spawn(async move {
            if let Some(sig) = wait_for_signal(&coordinator.config.signals).await {
                info!(signal = ?sig, "Received shutdown signal");
                coordinator.shutdown(false).await;
            }
        })
    }

    /// Chain a panic hook that triggers an emergency shutdown.
    ///
    /// The previous hook still runs first. Fails outside a Tokio runtime.
    pub fn trigger_on_panic(self: &Arc<Self>) -> Result<(), tokio::runtime::TryCurrentError> {
        let runtime = tokio::runtime::Handle::try_current()?;
        let coordinator = Arc::downgrade(self);
        let previous = std::panic::take_hook();

        std::panic::set_hook(Box::new(move |info| {
            previous(info);

            if let Some(coordinator) = coordinator.upgrade()
                && !coordinator.is_shutting_down()
            {
                error!(panic = %info, "Panic detected, starting emergency shutdown");
                runtime.spawn(async move {
                    coordinator.shutdown(true).await;
                });
            }
        }));

        Ok(())
    }

    fn emit(&self, kind: EventKind) {
        events::emit(&self.config.events, "shutdown", kind);
    }
}

#[cfg(unix)]
async fn wait_for_signal(signals: &[ShutdownSignal]) -> Option<ShutdownSignal> {
    use futures_util::future::select_all;
    use tokio::signal::unix::signal;

    let mut streams = Vec::new();
    for sig in signals {
        match signal(sig.kind()) {
            Ok(stream) => streams.push((*sig, stream)),
            Err(e) => warn!(signal = ?sig, error = %e, "Failed to install signal handler"),
        }
    }

    if streams.is_empty() {
        return None;
    }

    let waits = streams.iter_mut().map(|(sig, stream)| {
        let sig = *sig;
        Box::pin(async move {
            stream.recv().await;
            sig
        })
    });
    let (sig, _, _) = select_all(waits).await;
    Some(sig)
}

#[cfg(not(unix))]
async fn wait_for_signal(signals: &[ShutdownSignal]) -> Option<ShutdownSignal> {
    if !signals.contains(&ShutdownSignal::Interrupt) {
        return None;
    }
    tokio::signal::ctrl_c()
        .await
        .ok()
        .map(|_| ShutdownSignal::Interrupt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn recording(
        name: &'static str,
        log: &Arc<Mutex<Vec<String>>>,
        work: Duration,
    ) -> ShutdownHandler {
        let log = Arc::clone(log);
        ShutdownHandler::new(name, move || {
            let log = Arc::clone(&log);
            async move {
                log.lock().push(format!("{name}:start"));
                tokio::time::sleep(work).await;
                log.lock().push(format!("{name}:end"));
                Ok(())
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_batches() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let coordinator = ShutdownCoordinator::new(ShutdownConfig::default());

        coordinator
            .register(recording("a", &log, Duration::from_millis(100)).priority(10))
            .unwrap();
        coordinator
            .register(recording("b", &log, Duration::from_millis(100)).priority(5))
            .unwrap();
        coordinator
            .register(recording("c", &log, Duration::from_millis(50)).priority(5))
            .unwrap();

        let report = coordinator.shutdown(false).await;
        assert!(report.success);

        let log = log.lock().clone();
        assert_eq!(&log[..2], &["a:start", "a:end"]);
        // The two priority-5 handlers overlap.
        assert_eq!(&log[2..4], &["b:start", "c:start"]);
        assert_eq!(&log[4..], &["c:end", "b:end"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_timeout_reports_failure() {
        let coordinator =
            ShutdownCoordinator::new(ShutdownConfig::default().timeout(Duration::from_secs(2)));

        coordinator
            .register(ShutdownHandler::new("stuck", || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }))
            .unwrap();

        let started = Instant::now();
        let report = coordinator.shutdown(false).await;

        assert!(!report.success);
        assert!(report.timed_out);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
        assert!(!report.handler("stuck").unwrap().success);
        assert!(matches!(
            report.into_result(),
            Err(ResilienceError::ShutdownTimedOut { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_emergency_halves_deadline() {
        let coordinator =
            ShutdownCoordinator::new(ShutdownConfig::default().timeout(Duration::from_secs(10)));
        coordinator
            .register(ShutdownHandler::new("stuck", || std::future::pending()))
            .unwrap();

        let started = Instant::now();
        let report = coordinator.shutdown(true).await;

        assert!(report.emergency);
        assert_eq!(report.deadline, Duration::from_secs(5));
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_timeout_and_error() {
        let coordinator = ShutdownCoordinator::new(ShutdownConfig::default());
        coordinator
            .register(
                ShutdownHandler::new("slow", || async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(())
                })
                .timeout(Duration::from_secs(1)),
            )
            .unwrap();
        coordinator
            .register(ShutdownHandler::new("broken", || async {
                Err("flush failed".into())
            }))
            .unwrap();

        let report = coordinator.shutdown(false).await;

        assert!(!report.success);
        assert!(!report.timed_out);
        assert!(report.handler("slow").unwrap().error.as_deref().unwrap().contains("timed out"));
        assert_eq!(
            report.handler("broken").unwrap().error.as_deref(),
            Some("flush failed")
        );
    }

    #[tokio::test]
    async fn test_shutdown_runs_once() {
        let runs = Arc::new(AtomicU32::new(0));
        let coordinator = ShutdownCoordinator::new(ShutdownConfig::default());
        let counter = Arc::clone(&runs);
        coordinator
            .register(ShutdownHandler::new("once", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            }))
            .unwrap();

        let (first, second) = tokio::join!(coordinator.shutdown(false), coordinator.shutdown(false));
        assert!(first.success && second.success);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(coordinator.report().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_trigger_keeps_running() {
        let runs = Arc::new(AtomicU32::new(0));
        let coordinator = ShutdownCoordinator::new(ShutdownConfig::default());
        let counter = Arc::clone(&runs);
        coordinator
            .register(ShutdownHandler::new("flush", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    Ok(())
                }
            }))
            .unwrap();

        let started = Instant::now();
        let abandoned =
            tokio::time::timeout(Duration::from_secs(1), coordinator.shutdown(false)).await;
        assert!(abandoned.is_err());
        assert!(coordinator.is_shutting_down());

        let report = coordinator.shutdown(false).await;

        assert!(report.success);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    async fn explode() -> Result<(), BoxError> {
        panic!("handler bug")
    }

    #[tokio::test]
    async fn test_panicking_handler_still_reports() {
        let coordinator = ShutdownCoordinator::new(ShutdownConfig::default());
        coordinator
            .register(ShutdownHandler::new("explode", explode))
            .unwrap();
        coordinator
            .register(ShutdownHandler::new("close", || async { Ok(()) }).priority(-1))
            .unwrap();

        let report = coordinator.shutdown(false).await;

        assert!(!report.success);
        assert!(report.handler("close").unwrap().success);
        assert_eq!(
            report.handler("explode").unwrap().error.as_deref(),
            Some("handler panicked")
        );
        assert!(matches!(
            report.into_result(),
            Err(ResilienceError::ShutdownHandlerFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_registration_closed_after_start() {
        let coordinator = ShutdownCoordinator::new(ShutdownConfig::default());
        coordinator.shutdown(false).await;

        let result = coordinator.register(ShutdownHandler::new("late", || async { Ok(()) }));
        assert!(matches!(
            result,
            Err(ResilienceError::RegistrationClosed { .. })
        ));
        assert!(coordinator.is_shutting_down());
    }

    #[test]
    fn test_register_replaces_and_unregisters() {
        let coordinator = ShutdownCoordinator::new(ShutdownConfig::default());
        coordinator
            .register(ShutdownHandler::new("db", || async { Ok(()) }))
            .unwrap();
        coordinator
            .register(ShutdownHandler::new("db", || async { Ok(()) }).priority(3))
            .unwrap();

        assert_eq!(coordinator.handler_count(), 1);
        assert!(coordinator.unregister("db"));
        assert!(!coordinator.unregister("db"));
    }
}
