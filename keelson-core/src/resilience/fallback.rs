//! Fallback pattern for graceful degradation.
//!
//! [`FallbackController`] runs a primary operation and, when it fails, an
//! alternative. Keyed calls are cached: a fresh entry short-circuits both
//! functions, and a stale one is served when both fail (`stale_if_error`).
//!
//! [`MultiLevelFallback`] tries an ordered list of named levels and reports
//! which one answered.
//!
//! ## Example
//!
//! ```rust,ignore
//! use keelson::resilience::{FallbackConfig, FallbackController, FallbackSource};
//!
//! let profiles = FallbackController::new(FallbackConfig::new("profiles").cache_ttl(Duration::from_secs(30)));
//!
//! let outcome = profiles
//!     .execute(
//!         || async { profile_service.fetch(user_id).await },
//!         || async { Ok(Profile::anonymous(user_id)) },
//!         Some(&format!("profile:{user_id}")),
//!     )
//!     .await?;
//!
//! if outcome.source != FallbackSource::Primary {
//!     tracing::warn!(source = ?outcome.source, "serving degraded profile");
//! }
//! ```

use crate::error::ResilienceError;
use crate::events::{self, EventBus, EventKind};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Type alias for an async fallback function.
pub type FallbackFn<T, E> =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<T, E>> + Send>> + Send + Sync>;

type KeyLocks = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// Fallback configuration.
#[derive(Debug, Clone)]
pub struct FallbackConfig {
    pub name: String,
    /// How long a cached value counts as fresh.
    pub cache_ttl: Duration,
    /// Serve an expired entry when both primary and fallback fail.
    pub stale_if_error: bool,
    pub events: Option<EventBus>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            cache_ttl: Duration::from_secs(60),
            stale_if_error: true,
            events: None,
        }
    }
}

impl FallbackConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn stale_if_error(mut self, enabled: bool) -> Self {
        self.stale_if_error = enabled;
        self
    }

    pub fn events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }
}

/// Where a value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackSource {
    Primary,
    Fallback,
    Cache,
}

/// A value plus the error that forced degradation, if any.
#[derive(Debug)]
pub struct FallbackOutcome<T, E> {
    pub value: T,
    pub source: FallbackSource,
    /// Primary's error when served by the fallback; the fallback's error when
    /// served stale from cache.
    pub error: Option<E>,
}

impl<T, E> FallbackOutcome<T, E> {
    fn new(value: T, source: FallbackSource, error: Option<E>) -> Self {
        Self {
            value,
            source,
            error,
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn is_degraded(&self) -> bool {
        self.source != FallbackSource::Primary
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    stored_at: Instant,
}

/// Primary/fallback executor with a keyed last-known-good cache.
pub struct FallbackController<T> {
    config: FallbackConfig,
    cache: RwLock<HashMap<String, CacheEntry<T>>>,
    locks: KeyLocks,
}

impl<T: Clone> FallbackController<T> {
    pub fn new(config: FallbackConfig) -> Arc<Self> {
        debug!(
            name = %config.name,
            cache_ttl = ?config.cache_ttl,
            stale_if_error = config.stale_if_error,
            "Fallback controller initialized"
        );

        Arc::new(Self {
            config,
            cache: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Execute the primary operation, falling back on failure.
    ///
    /// Calls sharing a `cache_key` run one at a time.
    pub async fn execute<P, PFut, F, FFut, E>(
        &self,
        primary: P,
        fallback: F,
        cache_key: Option<&str>,
    ) -> Result<FallbackOutcome<T, E>, E>
    where
        P: FnOnce() -> PFut,
        PFut: Future<Output = Result<T, E>>,
        F: FnOnce() -> FFut,
        FFut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let _key_lock = match cache_key {
            Some(key) => Some(KeyLock::acquire(&self.locks, key).await),
            None => None,
        };

        if let Some(key) = cache_key
            && let Some(value) = self.lookup(key, true)
        {
            debug!(name = %self.config.name, key, "Serving cached value");
            self.emit(EventKind::CacheHit {
                key: key.to_string(),
            });
            return Ok(FallbackOutcome::new(value, FallbackSource::Cache, None));
        }

        let primary_error = match primary().await {
            Ok(value) => {
                self.store(cache_key, &value);
                return Ok(FallbackOutcome::new(value, FallbackSource::Primary, None));
            }
            Err(err) => err,
        };

        debug!(
            name = %self.config.name,
            error = %primary_error,
            "Primary operation failed, using fallback"
        );
        self.emit(EventKind::PrimaryFailed {
            error: primary_error.to_string(),
        });

        let fallback_error = match fallback().await {
            Ok(value) => {
                self.store(cache_key, &value);
                self.emit(EventKind::FallbackUsed {
                    key: cache_key.map(str::to_string),
                });
                return Ok(FallbackOutcome::new(
                    value,
                    FallbackSource::Fallback,
                    Some(primary_error),
                ));
            }
            Err(err) => err,
        };

        if self.config.stale_if_error
            && let Some(key) = cache_key
            && let Some(value) = self.lookup(key, false)
        {
            warn!(
                name = %self.config.name,
                key,
                error = %fallback_error,
                "Primary and fallback failed, serving stale value"
            );
            self.emit(EventKind::StaleCacheHit {
                key: key.to_string(),
            });
            return Ok(FallbackOutcome::new(
                value,
                FallbackSource::Cache,
                Some(fallback_error),
            ));
        }

        warn!(
            name = %self.config.name,
            error = %fallback_error,
            "Primary and fallback failed"
        );
        Err(fallback_error)
    }

    /// Read a cached value. A stale entry is evicted on a fresh-only read
    /// unless stale values are retained for error recovery.
    fn lookup(&self, key: &str, fresh_only: bool) -> Option<T> {
        {
            let cache = self.cache.read();
            let entry = cache.get(key)?;

            if !fresh_only || entry.stored_at.elapsed() < self.config.cache_ttl {
                return Some(entry.value.clone());
            }
        }

        if !self.config.stale_if_error {
            let mut cache = self.cache.write();
            if cache
                .get(key)
                .is_some_and(|entry| entry.stored_at.elapsed() >= self.config.cache_ttl)
            {
                cache.remove(key);
                debug!(name = %self.config.name, key, "Evicted stale cache entry");
            }
        }
        None
    }

    fn store(&self, key: Option<&str>, value: &T) {
        if let Some(key) = key {
            self.cache.write().insert(
                key.to_string(),
                CacheEntry {
                    value: value.clone(),
                    stored_at: Instant::now(),
                },
            );
        }
    }

    fn emit(&self, kind: EventKind) {
        events::emit(&self.config.events, &self.config.name, kind);
    }

    /// Drop one cached entry. Returns whether it existed.
    pub fn invalidate(&self, key: &str) -> bool {
        self.cache.write().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.cache.write().clear();
    }

    /// Number of cached keys, fresh or stale.
    pub fn cached_keys(&self) -> usize {
        self.cache.read().len()
    }
}

/// Held while a keyed call runs. Removes the table entry once no other
/// caller is waiting on it.
struct KeyLock<'a> {
    locks: &'a KeyLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<'a> KeyLock<'a> {
    async fn acquire(locks: &'a KeyLocks, key: &str) -> Self {
        let mutex = locks
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();

        Self {
            locks,
            key: key.to_string(),
            guard: Some(mutex.lock_owned().await),
        }
    }
}

impl Drop for KeyLock<'_> {
    fn drop(&mut self) {
        self.guard.take();

        let mut locks = self.locks.lock();
        if let Some(mutex) = locks.get(&self.key)
            && Arc::strong_count(mutex) == 1
        {
            locks.remove(&self.key);
        }
    }
}

/// Which level of a [`MultiLevelFallback`] produced the value.
#[derive(Debug, Clone)]
pub struct LevelOutcome<T> {
    pub value: T,
    pub level: String,
}

/// Ordered chain of named alternatives.
pub struct MultiLevelFallback<T, E> {
    name: String,
    levels: Vec<(String, FallbackFn<T, E>)>,
    events: Option<EventBus>,
}

impl<T, E> MultiLevelFallback<T, E>
where
    T: Send + 'static,
    E: From<ResilienceError> + Display + Send + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            levels: Vec::new(),
            events: None,
        }
    }

    /// Append a level. Levels run in insertion order.
    pub fn level<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.levels.push((name.into(), Arc::new(move || Box::pin(f()))));
        self
    }

    pub fn events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Try each level until one succeeds.
    pub async fn execute(&self) -> Result<LevelOutcome<T>, E> {
        let mut last_error = String::from("no fallback levels configured");

        for (level, run) in &self.levels {
            match run().await {
                Ok(value) => {
                    debug!(name = %self.name, level = %level, "Fallback level succeeded");
                    return Ok(LevelOutcome {
                        value,
                        level: level.clone(),
                    });
                }
                Err(err) => {
                    debug!(name = %self.name, level = %level, error = %err, "Fallback level failed");
                    last_error = err.to_string();
                    events::emit(
                        &self.events,
                        &self.name,
                        EventKind::LevelFailed {
                            level: level.clone(),
                            error: last_error.clone(),
                        },
                    );
                }
            }
        }

        warn!(name = %self.name, levels = self.levels.len(), "All fallback levels failed");
        Err(ResilienceError::AllFallbackLevelsFailed {
            levels: self.levels.iter().map(|(name, _)| name.clone()).collect(),
            last_error,
        }
        .into())
    }
}

impl<T, E> Clone for MultiLevelFallback<T, E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            levels: self.levels.clone(),
            events: self.events.clone(),
        }
    }
}
