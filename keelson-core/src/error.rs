// Error types for the Keelson resilience primitives

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Boxed error used for operation failures and probe errors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Conditions raised by the primitives themselves.
///
/// Every controller is generic over the caller's error type `E` and converts
/// these through `E: From<ResilienceError>`, so errors produced by the wrapped
/// operation pass through untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResilienceError {
    #[error("Operation timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("Circuit breaker '{name}' is open")]
    CircuitOpen { name: String },

    #[error("Bulkhead '{name}' queue is full ({max_queue_size} waiting)")]
    QueueFull { name: String, max_queue_size: usize },

    #[error("'{name}' is shutting down")]
    ShuttingDown { name: String },

    #[error("All fallback levels failed [{}]: {last_error}", .levels.join(", "))]
    AllFallbackLevelsFailed {
        levels: Vec<String>,
        last_error: String,
    },

    #[error("Shutdown handler '{name}' failed: {message}")]
    ShutdownHandlerFailed { name: String, message: String },

    #[error("Shutdown did not complete within {after:?}")]
    ShutdownTimedOut { after: Duration },

    #[error("Cannot register '{name}': shutdown already in progress")]
    RegistrationClosed { name: String },
}

impl ResilienceError {
    /// Get the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::QueueFull { .. } => ErrorKind::QueueFull,
            Self::ShuttingDown { .. } => ErrorKind::ShuttingDown,
            Self::AllFallbackLevelsFailed { .. } => ErrorKind::AllFallbackLevelsFailed,
            Self::ShutdownHandlerFailed { .. } => ErrorKind::ShutdownHandlerFailed,
            Self::ShutdownTimedOut { .. } => ErrorKind::ShutdownTimedOut,
            Self::RegistrationClosed { .. } => ErrorKind::RegistrationClosed,
        }
    }

    /// Check if the call was rejected by an open circuit.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Check if the call hit a deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if the call was refused without running (open circuit, full
    /// queue, shutdown).
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::CircuitOpen { .. } | Self::QueueFull { .. } | Self::ShuttingDown { .. }
        )
    }

    /// Get the HTTP status code a host should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::CircuitOpen { .. } | Self::QueueFull { .. } | Self::ShuttingDown { .. } => 503,
            Self::Timeout { .. } => 504,
            _ => 500,
        }
    }
}

/// Coarse classification of failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    CircuitOpen,
    QueueFull,
    ShuttingDown,
    AllFallbackLevelsFailed,
    ShutdownHandlerFailed,
    ShutdownTimedOut,
    RegistrationClosed,
    /// The wrapped operation itself failed.
    UnderlyingOperationFailed,
}

/// Ready-made caller error for composing the primitives.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Resilience(#[from] ResilienceError),

    #[error("Operation failed: {0}")]
    Operation(#[source] BoxError),
}

impl Error {
    /// Wrap an operation failure.
    pub fn operation(err: impl Into<BoxError>) -> Self {
        Self::Operation(err.into())
    }

    /// Get the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Resilience(e) => e.kind(),
            Self::Operation(_) => ErrorKind::UnderlyingOperationFailed,
        }
    }

    /// Get the resilience condition, if this error is one.
    pub fn as_resilience(&self) -> Option<&ResilienceError> {
        match self {
            Self::Resilience(e) => Some(e),
            Self::Operation(_) => None,
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Resilience(e) => e.status_code(),
            Self::Operation(e) => e
                .downcast_ref::<HttpStatusError>()
                .map(|e| e.status)
                .unwrap_or(500),
        }
    }

    /// Check if the call was rejected by an open circuit.
    pub fn is_circuit_open(&self) -> bool {
        self.as_resilience().is_some_and(ResilienceError::is_circuit_open)
    }

    /// Check if the call hit a deadline.
    pub fn is_timeout(&self) -> bool {
        self.as_resilience().is_some_and(ResilienceError::is_timeout)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Operation(Box::new(err))
    }
}

impl From<HttpStatusError> for Error {
    fn from(err: HttpStatusError) -> Self {
        Self::Operation(Box::new(err))
    }
}

/// An HTTP response status surfaced as an error, so the default retry
/// predicate can classify it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("HTTP {status}: {message}")]
pub struct HttpStatusError {
    pub status: u16,
    pub message: String,
}

impl HttpStatusError {
    /// Status codes worth retrying.
    pub const RETRYABLE: [u16; 6] = [408, 429, 500, 502, 503, 504];

    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        Self::RETRYABLE.contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let open = ResilienceError::CircuitOpen {
            name: "db".to_string(),
        };
        assert_eq!(open.status_code(), 503);
        assert!(open.is_rejection());

        let timeout = ResilienceError::Timeout {
            after: Duration::from_secs(1),
        };
        assert_eq!(timeout.status_code(), 504);
        assert!(!timeout.is_rejection());

        let err = Error::from(HttpStatusError::new(429, "slow down"));
        assert_eq!(err.status_code(), 429);
        assert_eq!(err.kind(), ErrorKind::UnderlyingOperationFailed);
    }

    #[test]
    fn test_all_levels_failed_lists_levels() {
        let err = ResilienceError::AllFallbackLevelsFailed {
            levels: vec!["primary".to_string(), "replica".to_string()],
            last_error: "connection refused".to_string(),
        };

        let message = err.to_string();
        assert!(message.contains("primary, replica"));
        assert!(message.contains("connection refused"));
    }

    #[test]
    fn test_error_kind_passthrough() {
        let err: Error = ResilienceError::QueueFull {
            name: "pool".to_string(),
            max_queue_size: 4,
        }
        .into();

        assert_eq!(err.kind(), ErrorKind::QueueFull);
        assert!(!err.is_circuit_open());
        assert!(err.as_resilience().is_some());
    }

    #[test]
    fn test_http_status_retryable() {
        assert!(HttpStatusError::new(503, "unavailable").is_retryable());
        assert!(!HttpStatusError::new(404, "missing").is_retryable());
    }
}
