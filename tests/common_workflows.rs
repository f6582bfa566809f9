//! Integration tests for common Keelson workflows.
//!
//! These tests verify that the most common use cases work through the facade
//! crate.

use async_trait::async_trait;
use keelson::prelude::*;
use keelson::{BoxError, ErrorKind, HealthCheck};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

// =============================================================================
// Circuit Breaker Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_circuit_breaker_lifecycle() {
    let breaker = CircuitBreaker::new(
        CircuitBreakerConfig::new("payments")
            .volume_threshold(2)
            .reset_timeout(Duration::from_secs(5)),
    );

    for _ in 0..2 {
        let result: Result<(), Error> = breaker
            .execute(|| async { Err(Error::operation("gateway unavailable")) })
            .await;
        assert!(matches!(result, Err(Error::Operation(_))));
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    let invoked = AtomicU32::new(0);
    let rejected: Result<(), Error> = breaker
        .execute(|| async {
            invoked.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;
    assert!(rejected.unwrap_err().is_circuit_open());
    assert_eq!(invoked.load(Ordering::SeqCst), 0);

    tokio::time::advance(Duration::from_secs(5)).await;

    let probe: Result<&str, Error> = breaker.execute(|| async { Ok("recovered") }).await;
    assert_eq!(probe.unwrap(), "recovered");
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_circuit_breaker_fallback() {
    let breaker = CircuitBreaker::new(CircuitBreakerConfig::new("recommendations"));
    breaker.force_open();

    let result: Result<Vec<&str>, Error> = breaker
        .execute_with_fallback(
            || async { Ok(vec!["personalized"]) },
            |err: Error| async move {
                assert!(err.is_circuit_open());
                Ok(vec!["popular"])
            },
        )
        .await;

    assert_eq!(result.unwrap(), vec!["popular"]);
}

// =============================================================================
// Bulkhead Tests
// =============================================================================

#[tokio::test]
async fn test_bulkhead_task_with_priority_and_id() {
    let bulkhead = Bulkhead::new(BulkheadConfig::new("exports", 2).max_queue_size(4));

    let result: Result<usize, Error> = bulkhead
        .execute(
            Task::new(|| async { Ok(3) })
                .with_id("export-42")
                .priority(10)
                .timeout(Duration::from_secs(1)),
        )
        .await;

    assert_eq!(result.unwrap(), 3);
    let stats = bulkhead.stats();
    assert_eq!(stats.total_executed, 1);
    assert_eq!(stats.utilization(), 0.0);
}

// =============================================================================
// Retry / Timeout Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_retry_on_http_status() {
    let retry = RetryController::new(RetryConfig::new(4).jitter(false));
    let attempts = AtomicU32::new(0);

    let result: Result<&str, Error> = retry
        .execute(|| {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                match attempt {
                    0 => Err(keelson::HttpStatusError::new(503, "unavailable").into()),
                    1 => Err(keelson::HttpStatusError::new(429, "slow down").into()),
                    _ => Ok("ok"),
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), "ok");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_gives_up_on_client_error() {
    let retry = RetryController::new(RetryConfig::new(4));
    let attempts = AtomicU32::new(0);

    let result: Result<(), Error> = retry
        .execute(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(keelson::HttpStatusError::new(404, "not found").into()) }
        })
        .await;

    assert_eq!(result.unwrap_err().status_code(), 404);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[test]
fn test_timeout_outside_async_test() {
    let timeout = TimeoutController::with_duration(Duration::from_millis(20));

    let result: Result<(), Error> = tokio_test::block_on(timeout.execute(
        || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        },
        None,
    ));

    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(err.status_code(), 504);
}

// =============================================================================
// Fallback Tests
// =============================================================================

#[tokio::test]
async fn test_multi_level_configuration_lookup() {
    let chain = MultiLevelFallback::<String, Error>::new("settings")
        .level("remote", || async { Err(Error::operation("ECONNREFUSED")) })
        .level("defaults", || async { Ok("theme=dark".to_string()) });

    let outcome = chain.execute().await.unwrap();
    assert_eq!(outcome.level, "defaults");
    assert_eq!(outcome.value, "theme=dark");
}

#[tokio::test]
async fn test_fallback_controller_reports_source() {
    let fallback: Arc<FallbackController<u64>> = FallbackController::new(FallbackConfig::new("balance"));

    let outcome = fallback
        .execute(
            || async { Err(Error::operation("ledger offline")) },
            || async { Ok(0) },
            Some("account-7"),
        )
        .await
        .unwrap();

    assert_eq!(outcome.source, FallbackSource::Fallback);
    assert!(outcome.is_degraded());
    assert_eq!(fallback.cached_keys(), 1);
}

// =============================================================================
// Health Check Tests
// =============================================================================

struct DiskSpace {
    free_percent: u32,
}

#[async_trait]
impl HealthCheck for DiskSpace {
    async fn check(&self) -> Result<HealthCheckResult, BoxError> {
        let result = if self.free_percent < 10 {
            HealthCheckResult::degraded("disk nearly full")
        } else {
            HealthCheckResult::healthy()
        };
        Ok(result.with_metadata("freePercent", self.free_percent))
    }
}

#[tokio::test]
async fn test_health_report_serializes() {
    let registry = HealthCheckRegistry::new(HealthRegistryConfig::new("2.0.0"));
    registry.register(HealthCheckDescriptor::new("disk", DiskSpace { free_percent: 5 }));
    registry.register(HealthCheckDescriptor::from_fn("cache", || async {
        Err::<HealthCheckResult, BoxError>("connection refused".into())
    }));

    let report = registry.get_health().await;
    assert_eq!(report.status, HealthStatus::Degraded);
    assert_eq!(report.status.http_status_code(), 200);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["version"], "2.0.0");
    assert_eq!(json["checks"][0]["name"], "cache");
    assert_eq!(json["checks"][0]["status"], "unhealthy");
    assert_eq!(json["checks"][1]["metadata"]["freePercent"], 5);
}

// =============================================================================
// Events and Shutdown Tests
// =============================================================================

#[tokio::test]
async fn test_events_serialize_with_source() {
    let bus = EventBus::default();
    let mut events = bus.subscribe();
    let breaker = CircuitBreaker::new(CircuitBreakerConfig::new("search").events(bus));

    breaker.force_open();

    let event = events.recv().await.unwrap();
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["source"], "search");
    assert_eq!(json["event"], "open");
    assert!(json["timestampMs"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_graceful_shutdown_report() {
    let coordinator = ShutdownCoordinator::new(ShutdownConfig::default().timeout(Duration::from_secs(5)));

    coordinator
        .register(ShutdownHandler::new("http", || async { Ok(()) }).priority(100))
        .unwrap();
    coordinator
        .register(ShutdownHandler::new("db", || async { Err("pool busy".into()) }))
        .unwrap();

    let report = coordinator.shutdown(false).await;

    assert!(!report.success);
    assert!(report.handler("http").unwrap().success);
    let err = report.into_result().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ShutdownHandlerFailed);
    assert!(coordinator.register(ShutdownHandler::new("late", || async { Ok(()) })).is_err());
}
