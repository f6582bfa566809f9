//! # Resilience Patterns
//!
//! Primitives that wrap a fallible async operation and bound the damage it
//! can do.
//!
//! ## Patterns Included
//!
//! - **Circuit Breaker**: fail fast while a dependency is unhealthy
//! - **Bulkhead**: cap concurrency, queue by priority, reject on overflow
//! - **Retry**: retry transient failures with backoff and jitter
//! - **Timeout**: static or latency-adaptive deadlines
//! - **Fallback**: alternatives plus a last-known-good cache
//!
//! Every primitive returns the caller's error type unchanged when the
//! operation itself fails, and converts its own rejections from
//! [`ResilienceError`](crate::error::ResilienceError).
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use keelson::prelude::*;
//!
//! let breaker = CircuitBreaker::new(CircuitBreakerConfig::new("payments"));
//! let bulkhead = Bulkhead::new(BulkheadConfig::new("payments", 8));
//!
//! // Breaker outside the bulkhead: an open circuit never takes a slot.
//! let receipt: Result<Receipt, Error> = breaker
//!     .execute(|| bulkhead.call(|| async { gateway.charge(order).await.map_err(Error::operation) }))
//!     .await;
//! ```

mod bulkhead;
mod circuit_breaker;
mod fallback;
mod retry;
mod rolling;
mod timeout;

pub use bulkhead::*;
pub use circuit_breaker::*;
pub use fallback::*;
pub use retry::*;
pub use rolling::*;
pub use timeout::*;
