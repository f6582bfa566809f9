//! Bucketed sliding-window counters used by the circuit breaker.

use std::time::Duration;
use tokio::time::Instant;

/// Outcome of a single call, as counted by the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
    Timeout,
    /// Refused without running. Not counted as a request.
    Rejected,
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    successes: u64,
    failures: u64,
    timeouts: u64,
    rejections: u64,
}

/// Counts over the last `window` split into `buckets` slots. Each rotation
/// drops the oldest slot.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    buckets: Vec<Bucket>,
    bucket_duration: Duration,
    head: usize,
    head_started: Instant,
}

impl RollingWindow {
    pub fn new(window: Duration, buckets: u32) -> Self {
        let count = buckets.max(1);
        let bucket_duration = (window / count).max(Duration::from_millis(1));

        Self {
            buckets: vec![Bucket::default(); count as usize],
            bucket_duration,
            head: 0,
            head_started: Instant::now(),
        }
    }

    /// Duration covered by the whole window.
    pub fn window(&self) -> Duration {
        self.bucket_duration * self.buckets.len() as u32
    }

    pub fn record(&mut self, outcome: CallOutcome) {
        self.rotate(Instant::now());

        let bucket = &mut self.buckets[self.head];
        match outcome {
            CallOutcome::Success => bucket.successes += 1,
            CallOutcome::Failure => bucket.failures += 1,
            CallOutcome::Timeout => bucket.timeouts += 1,
            CallOutcome::Rejected => bucket.rejections += 1,
        }
    }

    pub fn snapshot(&mut self) -> WindowSnapshot {
        self.rotate(Instant::now());

        self.buckets
            .iter()
            .fold(WindowSnapshot::default(), |mut acc, bucket| {
                acc.successes += bucket.successes;
                acc.failures += bucket.failures;
                acc.timeouts += bucket.timeouts;
                acc.rejections += bucket.rejections;
                acc.requests += bucket.successes + bucket.failures + bucket.timeouts;
                acc
            })
    }

    pub fn reset(&mut self) {
        self.buckets.fill(Bucket::default());
        self.head_started = Instant::now();
    }

    fn rotate(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.head_started);
        let steps = (elapsed.as_nanos() / self.bucket_duration.as_nanos()) as u64;
        if steps == 0 {
            return;
        }

        let len = self.buckets.len();
        if steps >= len as u64 {
            self.buckets.fill(Bucket::default());
        } else {
            for _ in 0..steps {
                self.head = (self.head + 1) % len;
                self.buckets[self.head] = Bucket::default();
            }
        }

        let advance = u32::try_from(steps).unwrap_or(u32::MAX);
        self.head_started += self.bucket_duration.saturating_mul(advance);
    }
}

/// Totals across the live buckets of a [`RollingWindow`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Completed calls (successes, failures and timeouts).
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub rejections: u64,
}

impl WindowSnapshot {
    /// Failures and timeouts as a percentage of requests (0.0 - 100.0).
    pub fn error_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            (self.failures + self.timeouts) as f64 * 100.0 / self.requests as f64
        }
    }
}
