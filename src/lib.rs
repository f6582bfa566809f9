// Keelson - resilience primitives for async Rust services
//
// Circuit breakers, bulkheads, retries, timeouts and fallbacks, plus health
// checks and coordinated graceful shutdown.

// Re-export core functionality
pub use keelson_core::*;

pub mod prelude {
    pub use crate::{
        AdaptiveTimeoutConfig,
        BackoffStrategy,
        Bulkhead,
        BulkheadConfig,
        CircuitBreaker,
        CircuitBreakerConfig,
        CircuitState,
        Error,
        EventBus,
        FallbackConfig,
        FallbackController,
        FallbackSource,
        HealthCheckDescriptor,
        HealthCheckRegistry,
        HealthCheckResult,
        HealthRegistryConfig,
        HealthStatus,
        MultiLevelFallback,
        ResilienceError,
        RetryConfig,
        RetryController,
        ShutdownConfig,
        ShutdownCoordinator,
        ShutdownHandler,
        Task,
        TimeoutConfig,
        TimeoutController,
    };
}
