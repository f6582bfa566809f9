//! Structured notifications published by the resilience primitives.
//!
//! Every component logs through `tracing`. When configured with an
//! [`EventBus`], it also publishes an [`Event`] for each state change,
//! rejection, retry and shutdown step. The bus is a bounded broadcast
//! channel: slow subscribers observe `Lagged` instead of growing memory.
//!
//! ## Example
//!
//! ```rust,ignore
//! use keelson::events::EventBus;
//! use keelson::resilience::{CircuitBreaker, CircuitBreakerConfig};
//!
//! let bus = EventBus::default();
//! let mut events = bus.subscribe();
//!
//! let breaker = CircuitBreaker::new(CircuitBreakerConfig::new("payments").events(bus));
//!
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("{}", serde_json::to_string(&event).unwrap());
//!     }
//! });
//! ```

use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;

/// A notification emitted by a named component.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Name of the emitting component.
    pub source: String,
    /// What happened.
    #[serde(flatten)]
    pub kind: EventKind,
    /// Unix timestamp in milliseconds.
    pub timestamp_ms: u64,
}

/// Event payloads, tagged by a stable camelCase name.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EventKind {
    // Circuit breaker
    Open { error_rate: f64, requests: u64 },
    HalfOpen,
    Close,
    Success { duration_ms: u64 },
    Failure { duration_ms: u64, error: String },
    Timeout { timeout_ms: u64 },
    Reject { reason: String },
    Fallback,

    // Bulkhead
    Admitted { task_id: String, wait_ms: u64 },
    Queued {
        task_id: String,
        priority: i32,
        queue_length: usize,
    },
    Completed {
        task_id: String,
        duration_ms: u64,
        success: bool,
    },

    // Retry
    Retry {
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    Exhausted { attempts: u32, error: String },

    // Fallback
    CacheHit { key: String },
    PrimaryFailed { error: String },
    FallbackUsed { key: Option<String> },
    StaleCacheHit { key: String },
    LevelFailed { level: String, error: String },

    // Health
    CheckCompleted { check: String, status: String },

    // Shutdown
    ShutdownStarted { emergency: bool },
    HandlerCompleted { handler: String, duration_ms: u64 },
    HandlerFailed { handler: String, error: String },
    ShutdownCompleted { success: bool, duration_ms: u64 },
}

impl EventKind {
    /// Stable event name, matching the serialized `event` tag.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Open { .. } => "open",
            Self::HalfOpen => "halfOpen",
            Self::Close => "close",
            Self::Success { .. } => "success",
            Self::Failure { .. } => "failure",
            Self::Timeout { .. } => "timeout",
            Self::Reject { .. } => "reject",
            Self::Fallback => "fallback",
            Self::Admitted { .. } => "admitted",
            Self::Queued { .. } => "queued",
            Self::Completed { .. } => "completed",
            Self::Retry { .. } => "retry",
            Self::Exhausted { .. } => "exhausted",
            Self::CacheHit { .. } => "cacheHit",
            Self::PrimaryFailed { .. } => "primaryFailed",
            Self::FallbackUsed { .. } => "fallbackUsed",
            Self::StaleCacheHit { .. } => "staleCacheHit",
            Self::LevelFailed { .. } => "levelFailed",
            Self::CheckCompleted { .. } => "checkCompleted",
            Self::ShutdownStarted { .. } => "shutdownStarted",
            Self::HandlerCompleted { .. } => "handlerCompleted",
            Self::HandlerFailed { .. } => "handlerFailed",
            Self::ShutdownCompleted { .. } => "shutdownCompleted",
        }
    }
}

/// Bounded broadcast channel for [`Event`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Default channel capacity.
    pub const DEFAULT_CAPACITY: usize = 1024;

    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish an event. Dropped silently when nobody is subscribed.
    pub fn emit(&self, source: &str, kind: EventKind) {
        let _ = self.sender.send(Event {
            source: source.to_string(),
            kind,
            timestamp_ms: current_timestamp_ms(),
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

/// Publish to an optional bus.
pub(crate) fn emit(bus: &Option<EventBus>, source: &str, kind: EventKind) {
    if let Some(bus) = bus {
        bus.emit(source, kind);
    }
}

/// Returns the current Unix timestamp in milliseconds
pub(crate) fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
