//! Bulkhead pattern for resource isolation.
//!
//! The bulkhead limits how many operations run against a resource at once.
//! Work beyond `max_concurrent` waits in a bounded priority queue; beyond
//! `max_queue_size` it is rejected immediately with
//! [`ResilienceError::QueueFull`].
//!
//! A finishing task hands its slot straight to the highest-priority waiter
//! (FIFO within a priority). There is no background dispatcher.
//!
//! ## Example
//!
//! ```rust,ignore
//! use keelson::resilience::{Bulkhead, BulkheadConfig, Task};
//!
//! let bulkhead = Bulkhead::new(
//!     BulkheadConfig::new("reports", 4)
//!         .max_queue_size(32)
//!         .default_timeout(Duration::from_secs(10)),
//! );
//!
//! let report = bulkhead
//!     .execute(Task::new(|| async { render_report().await }).priority(5))
//!     .await?;
//! ```

use crate::error::ResilienceError;
use crate::events::{self, EventBus, EventKind};
use crate::shutdown::ShutdownHandler;
use parking_lot::Mutex;
use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Bulkhead configuration.
#[derive(Debug, Clone)]
pub struct BulkheadConfig {
    /// Name of the bulkhead (for logging/events).
    pub name: String,
    /// Maximum concurrent executions.
    pub max_concurrent: usize,
    /// Maximum number of tasks waiting for a slot.
    pub max_queue_size: usize,
    /// Execution deadline for tasks that don't carry their own.
    pub default_timeout: Duration,
    pub events: Option<EventBus>,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            max_concurrent: 10,
            max_queue_size: 100,
            default_timeout: Duration::from_secs(30),
            events: None,
        }
    }
}

impl BulkheadConfig {
    /// Create a new configuration.
    pub fn new(name: impl Into<String>, max_concurrent: usize) -> Self {
        Self {
            name: name.into(),
            max_concurrent: max_concurrent.max(1),
            ..Default::default()
        }
    }

    /// Set the queue size.
    pub fn max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Set the default execution timeout.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }
}

/// A unit of work submitted to a [`Bulkhead`].
pub struct Task<F> {
    pub id: String,
    operation: F,
    /// Higher is dispatched first.
    pub priority: i32,
    /// Overrides the bulkhead's default timeout.
    pub timeout: Option<Duration>,
}

impl<F> Task<F> {
    pub fn new(operation: F) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            operation,
            priority: 0,
            timeout: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
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

impl<F> std::fmt::Debug for Task<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .finish()
    }
}

enum Admission {
    Run,
    Reject,
}

struct Waiter {
    priority: i32,
    seq: u64,
    tx: oneshot::Sender<Admission>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    // Max-heap: higher priority, then lower sequence number.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct BulkheadState {
    active: usize,
    queue: BinaryHeap<Waiter>,
    next_seq: u64,
    accepting: bool,
}

#[derive(Default)]
struct Timings {
    admitted: u64,
    average_wait_ms: f64,
    finished: u64,
    average_execution_ms: f64,
}

/// Bulkhead for limiting concurrent access.
pub struct Bulkhead {
    config: BulkheadConfig,
    state: Mutex<BulkheadState>,
    idle: Notify,
    timings: Mutex<Timings>,
    total_calls: AtomicU64,
    total_executed: AtomicU64,
    total_failed: AtomicU64,
    total_rejections: AtomicU64,
    total_timeouts: AtomicU64,
}

impl Bulkhead {
    /// Create a new bulkhead.
    pub fn new(config: BulkheadConfig) -> Arc<Self> {
        info!(
            name = %config.name,
            max_concurrent = config.max_concurrent,
            max_queue_size = config.max_queue_size,
            "Bulkhead initialized"
        );

        Arc::new(Self {
            config,
            state: Mutex::new(BulkheadState {
                active: 0,
                queue: BinaryHeap::new(),
                next_seq: 0,
                accepting: true,
            }),
            idle: Notify::new(),
            timings: Mutex::new(Timings::default()),
            total_calls: AtomicU64::new(0),
            total_executed: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
            total_timeouts: AtomicU64::new(0),
        })
    }

    /// Get the bulkhead name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Get current number of active executions.
    pub fn active_count(&self) -> usize {
        self.state.lock().active
    }

    /// Get current number of queued tasks.
    pub fn queue_length(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Whether new work is still admitted.
    pub fn is_accepting(&self) -> bool {
        self.state.lock().accepting
    }

    /// Shorthand for executing a default-priority [`Task`].
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<ResilienceError>,
    {
        self.execute(Task::new(op)).await
    }

    /// Execute a task with bulkhead protection.
    pub async fn execute<F, Fut, T, E>(&self, task: Task<F>) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<ResilienceError>,
    {
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        let Task {
            id,
            operation,
            priority,
            timeout,
        } = task;

        let submitted = Instant::now();
        let _slot = self.admit(&id, priority).await?;
        let wait = submitted.elapsed();
        self.record_wait(wait);

        events::emit(
            &self.config.events,
            &self.config.name,
            EventKind::Admitted {
                task_id: id.clone(),
                wait_ms: wait.as_millis() as u64,
            },
        );

        let limit = timeout.unwrap_or(self.config.default_timeout);
        let started = Instant::now();

        match tokio::time::timeout(limit, operation()).await {
            Ok(result) => {
                let elapsed = started.elapsed();
                self.record_execution(elapsed);
                self.total_executed.fetch_add(1, Ordering::Relaxed);
                if result.is_err() {
                    self.total_failed.fetch_add(1, Ordering::Relaxed);
                }

                events::emit(
                    &self.config.events,
                    &self.config.name,
                    EventKind::Completed {
                        task_id: id,
                        duration_ms: elapsed.as_millis() as u64,
                        success: result.is_ok(),
                    },
                );
                result
            }
            Err(_) => {
                self.total_timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(
                    name = %self.config.name,
                    task_id = %id,
                    timeout = ?limit,
                    "Bulkhead task timed out"
                );
                events::emit(
                    &self.config.events,
                    &self.config.name,
                    EventKind::Timeout {
                        timeout_ms: limit.as_millis() as u64,
                    },
                );
                Err(ResilienceError::Timeout { after: limit }.into())
            }
        }
    }

    /// Execute a blocking closure on tokio's blocking pool under the same
    /// admission rules.
    ///
    /// On timeout the slot is released but the closure keeps running on its
    /// thread until it returns.
    pub async fn execute_blocking<F, T, E>(&self, task: Task<F>) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<ResilienceError> + Send + 'static,
    {
        let name = self.config.name.clone();
        let Task {
            id,
            operation,
            priority,
            timeout,
        } = task;

        let offloaded = Task {
            id,
            priority,
            timeout,
            operation: move || async move {
                match tokio::task::spawn_blocking(operation).await {
                    Ok(result) => result,
                    Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                    Err(_) => Err(ResilienceError::ShuttingDown { name }.into()),
                }
            },
        };

        self.execute(offloaded).await
    }

    async fn admit(&self, id: &str, priority: i32) -> Result<Slot<'_>, ResilienceError> {
        let (rx, seq, queue_length) = {
            let mut state = self.state.lock();

            if !state.accepting {
                drop(state);
                return Err(self.reject("shutting down", ResilienceError::ShuttingDown {
                    name: self.config.name.clone(),
                }));
            }

            if state.active < self.config.max_concurrent {
                state.active += 1;
                return Ok(Slot { bulkhead: self });
            }

            if state.queue.len() >= self.config.max_queue_size {
                drop(state);
                debug!(name = %self.config.name, task_id = %id, "Bulkhead queue full, rejecting task");
                return Err(self.reject("queue full", ResilienceError::QueueFull {
                    name: self.config.name.clone(),
                    max_queue_size: self.config.max_queue_size,
                }));
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            let (tx, rx) = oneshot::channel();
            state.queue.push(Waiter { priority, seq, tx });
            (rx, seq, state.queue.len())
        };

        events::emit(
            &self.config.events,
            &self.config.name,
            EventKind::Queued {
                task_id: id.to_string(),
                priority,
                queue_length,
            },
        );

        let mut ticket = QueueTicket {
            bulkhead: self,
            seq,
            rx,
            settled: false,
        };

        let admission = (&mut ticket.rx).await;
        ticket.settled = true;

        match admission {
            Ok(Admission::Run) => Ok(Slot { bulkhead: self }),
            Ok(Admission::Reject) | Err(_) => Err(ResilienceError::ShuttingDown {
                name: self.config.name.clone(),
            }),
        }
    }

    fn reject(&self, reason: &str, error: ResilienceError) -> ResilienceError {
        self.total_rejections.fetch_add(1, Ordering::Relaxed);
        events::emit(
            &self.config.events,
            &self.config.name,
            EventKind::Reject {
                reason: reason.to_string(),
            },
        );
        error
    }

    /// Hand the slot to the next live waiter, or free it.
    fn release(&self) {
        let mut state = self.state.lock();

        while let Some(waiter) = state.queue.pop() {
            if waiter.tx.send(Admission::Run).is_ok() {
                return;
            }
        }

        state.active = state.active.saturating_sub(1);
        if state.active == 0 {
            self.idle.notify_waiters();
        }
    }

    fn record_wait(&self, wait: Duration) {
        let mut timings = self.timings.lock();
        timings.admitted += 1;
        timings.average_wait_ms +=
            (wait.as_secs_f64() * 1000.0 - timings.average_wait_ms) / timings.admitted as f64;
    }

    fn record_execution(&self, elapsed: Duration) {
        let mut timings = self.timings.lock();
        timings.finished += 1;
        timings.average_execution_ms += (elapsed.as_secs_f64() * 1000.0
            - timings.average_execution_ms)
            / timings.finished as f64;
    }

    /// Stop admitting work, reject everything queued and wait for running
    /// tasks to finish. Returns `true` if the bulkhead drained before the
    /// deadline.
    pub async fn shutdown(&self, deadline: Duration) -> bool {
        let rejected: Vec<Waiter> = {
            let mut state = self.state.lock();
            state.accepting = false;
            state.queue.drain().collect()
        };

        if !rejected.is_empty() {
            info!(
                name = %self.config.name,
                rejected = rejected.len(),
                "Bulkhead rejecting queued tasks"
            );
        }
        for waiter in rejected {
            self.total_rejections.fetch_add(1, Ordering::Relaxed);
            let _ = waiter.tx.send(Admission::Reject);
        }

        let idle = self.idle.notified();
        tokio::pin!(idle);
        idle.as_mut().enable();

        if self.state.lock().active == 0 {
            return true;
        }

        let drained = tokio::time::timeout(deadline, idle).await.is_ok();
        if !drained {
            warn!(
                name = %self.config.name,
                active = self.active_count(),
                deadline = ?deadline,
                "Bulkhead did not drain before deadline"
            );
        }
        drained
    }

    /// A [`ShutdownHandler`] that drains this bulkhead within its default
    /// timeout.
    pub fn shutdown_handler(self: &Arc<Self>, priority: i32) -> ShutdownHandler {
        let bulkhead = Arc::downgrade(self);
        let deadline = self.config.default_timeout;

        ShutdownHandler::new(format!("bulkhead:{}", self.config.name), move || {
            let bulkhead = bulkhead.clone();
            async move {
                match bulkhead.upgrade() {
                    Some(bulkhead) if !bulkhead.shutdown(deadline).await => {
                        Err(format!("bulkhead '{}' did not drain", bulkhead.name()).into())
                    }
                    _ => Ok(()),
                }
            }
        })
        .priority(priority)
    }

    /// Get bulkhead statistics.
    pub fn stats(&self) -> BulkheadStats {
        let (active, queued) = {
            let state = self.state.lock();
            (state.active, state.queue.len())
        };
        let timings = self.timings.lock();

        BulkheadStats {
            name: self.config.name.clone(),
            max_concurrent: self.config.max_concurrent,
            max_queue_size: self.config.max_queue_size,
            active,
            queued,
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_executed: self.total_executed.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
            total_timeouts: self.total_timeouts.load(Ordering::Relaxed),
            average_wait_ms: timings.average_wait_ms,
            average_execution_ms: timings.average_execution_ms,
        }
    }
}

/// An occupied execution slot. Dropping it dispatches the next waiter.
struct Slot<'a> {
    bulkhead: &'a Bulkhead,
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        self.bulkhead.release();
    }
}

/// A queue position. If the caller goes away before admission the entry is
/// removed; if a slot was already handed over it is passed on.
struct QueueTicket<'a> {
    bulkhead: &'a Bulkhead,
    seq: u64,
    rx: oneshot::Receiver<Admission>,
    settled: bool,
}

impl Drop for QueueTicket<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        let dispatched = {
            let mut state = self.bulkhead.state.lock();
            let before = state.queue.len();
            state.queue.retain(|waiter| waiter.seq != self.seq);
            state.queue.len() == before
        };

        // Admission is sent under the state lock, so it is visible here.
        if dispatched && let Ok(Admission::Run) = self.rx.try_recv() {
            self.bulkhead.release();
        }
    }
}

/// Bulkhead statistics.
#[derive(Debug, Clone)]
pub struct BulkheadStats {
    /// Bulkhead name.
    pub name: String,
    pub max_concurrent: usize,
    pub max_queue_size: usize,
    /// Current active executions.
    pub active: usize,
    /// Current queued tasks.
    pub queued: usize,
    /// Total submitted tasks.
    pub total_calls: u64,
    /// Tasks that ran to completion, successfully or not.
    pub total_executed: u64,
    pub total_failed: u64,
    /// Rejected for a full queue or during shutdown.
    pub total_rejections: u64,
    pub total_timeouts: u64,
    pub average_wait_ms: f64,
    pub average_execution_ms: f64,
}

impl BulkheadStats {
    /// Calculate utilization (0.0 - 1.0).
    pub fn utilization(&self) -> f64 {
        self.active as f64 / self.max_concurrent as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tokio_util::sync::CancellationToken;

    async fn wait_until(cond: impl Fn() -> bool) {
        for _ in 0..10_000 {
            if cond() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("condition not reached");
    }

    fn gated(bulkhead: &Arc<Bulkhead>, gate: &CancellationToken) -> tokio::task::JoinHandle<Result<(), Error>> {
        let bulkhead = bulkhead.clone();
        let gate = gate.clone();
        tokio::spawn(async move {
            bulkhead
                .call(|| async move {
                    gate.cancelled().await;
                    Ok(())
                })
                .await
        })
    }

    #[tokio::test]
    async fn test_bulkhead_allows_concurrent() {
        let bulkhead = Bulkhead::new(BulkheadConfig::new("test", 2));

        let result: Result<i32, Error> = bulkhead.call(|| async { Ok(42) }).await;

        assert_eq!(result.unwrap(), 42);
        let stats = bulkhead.stats();
        assert_eq!(stats.total_executed, 1);
        assert_eq!(stats.active, 0);
    }

    #[tokio::test]
    async fn test_queue_then_reject_when_full() {
        let bulkhead = Bulkhead::new(BulkheadConfig::new("test", 2).max_queue_size(1));
        let gate = CancellationToken::new();

        let running = [gated(&bulkhead, &gate), gated(&bulkhead, &gate)];
        wait_until(|| bulkhead.active_count() == 2).await;

        let queued = gated(&bulkhead, &gate);
        wait_until(|| bulkhead.queue_length() == 1).await;

        let result: Result<(), Error> = bulkhead.call(|| async { Ok(()) }).await;
        assert!(matches!(
            result.unwrap_err().as_resilience(),
            Some(ResilienceError::QueueFull { max_queue_size: 1, .. })
        ));

        gate.cancel();
        for handle in running {
            handle.await.unwrap().unwrap();
        }
        queued.await.unwrap().unwrap();

        let stats = bulkhead.stats();
        assert_eq!(stats.total_executed, 3);
        assert_eq!(stats.total_rejections, 1);
        assert_eq!(stats.active, 0);
    }

    #[tokio::test]
    async fn test_priority_order() {
        let bulkhead = Bulkhead::new(BulkheadConfig::new("test", 1));
        let gate = CancellationToken::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let blocker = gated(&bulkhead, &gate);
        wait_until(|| bulkhead.active_count() == 1).await;

        let mut handles = Vec::new();
        for (label, priority) in [("1a", 1), ("5", 5), ("1b", 1)] {
            let bulkhead_ = bulkhead.clone();
            let order = order.clone();
            let expected = bulkhead.queue_length() + 1;
            handles.push(tokio::spawn(async move {
                bulkhead_
                    .execute(
                        Task::new(|| async move {
                            order.lock().push(label);
                            Ok::<_, Error>(())
                        })
                        .priority(priority),
                    )
                    .await
            }));
            wait_until(|| bulkhead.queue_length() == expected).await;
        }

        gate.cancel();
        blocker.await.unwrap().unwrap();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(*order.lock(), vec!["5", "1a", "1b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_releases_slot() {
        let bulkhead = Bulkhead::new(BulkheadConfig::new("test", 1));

        let result: Result<(), Error> = bulkhead
            .execute(
                Task::new(|| async {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok(())
                })
                .timeout(Duration::from_millis(50)),
            )
            .await;

        assert!(result.unwrap_err().is_timeout());
        assert_eq!(bulkhead.stats().total_timeouts, 1);
        assert_eq!(bulkhead.active_count(), 0);

        let next: Result<i32, Error> = bulkhead.call(|| async { Ok(1) }).await;
        assert_eq!(next.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_queued() {
        let bulkhead = Bulkhead::new(BulkheadConfig::new("test", 1));
        let gate = CancellationToken::new();

        let running = gated(&bulkhead, &gate);
        wait_until(|| bulkhead.active_count() == 1).await;
        let queued = gated(&bulkhead, &gate);
        wait_until(|| bulkhead.queue_length() == 1).await;

        let draining = {
            let bulkhead = bulkhead.clone();
            tokio::spawn(async move { bulkhead.shutdown(Duration::from_secs(5)).await })
        };

        let rejected = queued.await.unwrap().unwrap_err();
        assert_eq!(rejected.kind(), crate::error::ErrorKind::ShuttingDown);

        let late: Result<(), Error> = bulkhead.call(|| async { Ok(()) }).await;
        assert_eq!(late.unwrap_err().kind(), crate::error::ErrorKind::ShuttingDown);

        gate.cancel();
        running.await.unwrap().unwrap();
        assert!(draining.await.unwrap());
        assert!(!bulkhead.is_accepting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_deadline_exceeded() {
        let bulkhead = Bulkhead::new(BulkheadConfig::new("test", 1));

        let slow = {
            let bulkhead = bulkhead.clone();
            tokio::spawn(async move {
                bulkhead
                    .call(|| async {
                        tokio::time::sleep(Duration::from_secs(10)).await;
                        Ok::<_, Error>(())
                    })
                    .await
            })
        };
        wait_until(|| bulkhead.active_count() == 1).await;

        assert!(!bulkhead.shutdown(Duration::from_secs(1)).await);
        slow.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_dropped_waiter_is_skipped() {
        let bulkhead = Bulkhead::new(BulkheadConfig::new("test", 1).max_queue_size(1));
        let gate = CancellationToken::new();

        let running = gated(&bulkhead, &gate);
        wait_until(|| bulkhead.active_count() == 1).await;

        let abandoned = gated(&bulkhead, &gate);
        wait_until(|| bulkhead.queue_length() == 1).await;
        abandoned.abort();
        wait_until(|| bulkhead.queue_length() == 0).await;

        let replacement = gated(&bulkhead, &gate);
        wait_until(|| bulkhead.queue_length() == 1).await;

        gate.cancel();
        running.await.unwrap().unwrap();
        replacement.await.unwrap().unwrap();
        assert_eq!(bulkhead.active_count(), 0);
        assert_eq!(bulkhead.stats().total_executed, 2);
    }

    #[tokio::test]
    async fn test_execute_blocking() {
        let bulkhead = Bulkhead::new(BulkheadConfig::new("cpu", 2));

        let sum: Result<u64, Error> = bulkhead
            .execute_blocking(Task::new(|| Ok((1..=100u64).sum())))
            .await;

        assert_eq!(sum.unwrap(), 5050);
        assert_eq!(bulkhead.stats().total_executed, 1);
    }

    #[tokio::test]
    async fn test_admission_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let bulkhead = Bulkhead::new(BulkheadConfig::new("test", 1).events(bus));

        let _: Result<(), Error> = bulkhead
            .execute(Task::new(|| async { Ok(()) }).with_id("job-1"))
            .await;

        let admitted = rx.recv().await.unwrap();
        assert_eq!(admitted.kind.name(), "admitted");
        let completed = rx.recv().await.unwrap();
        assert!(matches!(
            completed.kind,
            EventKind::Completed { ref task_id, success: true, .. } if task_id == "job-1"
        ));
    }

    #[test]
    fn test_utilization() {
        let stats = BulkheadStats {
            name: "x".to_string(),
            max_concurrent: 4,
            max_queue_size: 10,
            active: 1,
            queued: 0,
            total_calls: 0,
            total_executed: 0,
            total_failed: 0,
            total_rejections: 0,
            total_timeouts: 0,
            average_wait_ms: 0.0,
            average_execution_ms: 0.0,
        };
        assert_eq!(stats.utilization(), 0.25);
    }
}
