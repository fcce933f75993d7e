//! Single cached value with TTL, retry interval and single-flight refresh.

use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::error::{RepositoryError, Result};
use crate::metrics;

/// Freshness policy of a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// How long a successfully fetched value stays fresh.
    pub refresh_interval: Duration,
    /// How long after a failed refresh no new attempt is made.
    pub retry_interval: Duration,
}

impl CacheConfig {
    /// Create a config, rejecting a retry interval longer than the refresh interval.
    pub fn new(refresh_interval: Duration, retry_interval: Duration) -> Result<Self> {
        if retry_interval > refresh_interval {
            return Err(RepositoryError::InvalidArgument(format!(
                "retry interval {retry_interval:?} exceeds refresh interval {refresh_interval:?}"
            )));
        }
        Ok(Self {
            refresh_interval,
            retry_interval,
        })
    }
}

/// Snapshot of a cache as seen by [`CachedValue::get_from_cache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheState<T> {
    /// Value is within its refresh interval and the last attempt succeeded.
    Valid { value: T, fetched_at: Instant },
    /// Value exists but outlived its refresh interval or the last refresh failed.
    Stale {
        value: T,
        fetched_at: Instant,
        error: Option<RepositoryError>,
    },
    /// Nothing fetched yet, or the value was invalidated.
    Empty { error: Option<RepositoryError> },
}

impl<T> CacheState<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Valid { value, .. } | Self::Stale { value, .. } => Some(value),
            Self::Empty { .. } => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Valid { value, .. } | Self::Stale { value, .. } => Some(value),
            Self::Empty { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&RepositoryError> {
        match self {
            Self::Valid { .. } => None,
            Self::Stale { error, .. } | Self::Empty { error } => error.as_ref(),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }
}

type RefreshFn<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

struct Slot<T> {
    value: Option<(T, Instant)>,
    last_attempt_at: Option<Instant>,
    last_error: Option<RepositoryError>,
    /// Bumped by every invalidation. A refresh started under an older
    /// generation does not store its outcome.
    generation: u64,
}

enum Decision<T> {
    Hit(T),
    /// Last attempt failed less than a retry interval ago.
    Suppressed(Result<T>),
    Refresh,
}

impl<T: Clone> Slot<T> {
    const fn empty() -> Self {
        Self {
            value: None,
            last_attempt_at: None,
            last_error: None,
            generation: 0,
        }
    }

    fn decide<P>(&self, now: Instant, config: &CacheConfig, accept: &P) -> Decision<T>
    where
        P: Fn(&T) -> bool,
    {
        let acceptable = self.value.as_ref().filter(|(value, _)| accept(value));

        if let (Some(error), Some(attempt)) = (&self.last_error, self.last_attempt_at) {
            if now.saturating_duration_since(attempt) < config.retry_interval {
                return Decision::Suppressed(match acceptable {
                    Some((value, _)) if error.is_upstream_failure() => Ok(value.clone()),
                    _ => Err(error.clone()),
                });
            }
            return Decision::Refresh;
        }

        match acceptable {
            Some((value, fetched_at))
                if now.saturating_duration_since(*fetched_at) < config.refresh_interval =>
            {
                Decision::Hit(value.clone())
            }
            _ => Decision::Refresh,
        }
    }

    fn state(&self, now: Instant, config: &CacheConfig) -> CacheState<T> {
        match &self.value {
            Some((value, fetched_at))
                if self.last_error.is_none()
                    && now.saturating_duration_since(*fetched_at) < config.refresh_interval =>
            {
                CacheState::Valid {
                    value: value.clone(),
                    fetched_at: *fetched_at,
                }
            }
            Some((value, fetched_at)) => CacheState::Stale {
                value: value.clone(),
                fetched_at: *fetched_at,
                error: self.last_error.clone(),
            },
            None => CacheState::Empty {
                error: self.last_error.clone(),
            },
        }
    }
}

/// A lazily fetched value that is refreshed when it outlives its TTL.
///
/// At most one refresh runs at a time. Callers of [`get`](Self::get) that
/// arrive during a refresh wait for it and share its outcome; callers of
/// [`get_from_cache`](Self::get_from_cache) never wait for it.
pub struct CachedValue<T> {
    name: &'static str,
    config: CacheConfig,
    refresh: RefreshFn<T>,
    slot: RwLock<Slot<T>>,
    in_flight: Mutex<()>,
}

impl<T> fmt::Debug for CachedValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedValue")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<T> CachedValue<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an empty cache. `name` labels log lines and metrics.
    #[must_use]
    pub fn new<F, Fut>(name: &'static str, config: CacheConfig, refresh: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            name,
            config,
            refresh: Arc::new(move || refresh().boxed()),
            slot: RwLock::new(Slot::empty()),
            in_flight: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn config(&self) -> CacheConfig {
        self.config
    }

    /// Return a fresh value, refreshing it first when missing or older than the TTL.
    pub async fn get(&self) -> Result<T> {
        self.get_matching(|_| true).await
    }

    /// Like [`get`](Self::get), but a cached value rejected by `accept` is
    /// treated as absent, even if it is within its refresh interval.
    pub async fn get_matching<P>(&self, accept: P) -> Result<T>
    where
        P: Fn(&T) -> bool,
    {
        match self.decide(&accept).await {
            Decision::Hit(value) => return Ok(value),
            Decision::Suppressed(result) => return result,
            Decision::Refresh => {}
        }

        let _flight = self.in_flight.lock().await;

        // Re-check: the refresh we waited for may have settled this call.
        match self.decide(&accept).await {
            Decision::Hit(value) => return Ok(value),
            Decision::Suppressed(result) => return result,
            Decision::Refresh => {}
        }

        let generation = self.generation().await;
        tracing::debug!(cache = self.name, "Refreshing cached value");
        let outcome = (self.refresh)().await;
        self.record(generation, outcome, &accept).await
    }

    /// Run `fetch` instead of the refresh function, under the same
    /// single-flight guard, and store its result.
    ///
    /// A failure is returned to the caller and leaves the previous value in place.
    pub async fn replace_with<F, Fut>(&self, fetch: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _flight = self.in_flight.lock().await;
        let generation = self.generation().await;
        let outcome = fetch().await;
        self.record(generation, outcome, &|_: &T| false).await
    }

    /// Current state without refreshing and without waiting for a running refresh.
    pub async fn get_from_cache(&self) -> CacheState<T> {
        self.slot.read().await.state(Instant::now(), &self.config)
    }

    /// Whether there is no value or the value is older than the refresh interval.
    pub async fn is_stale(&self) -> bool {
        let slot = self.slot.read().await;
        match &slot.value {
            Some((_, fetched_at)) => {
                Instant::now().saturating_duration_since(*fetched_at) >= self.config.refresh_interval
            }
            None => true,
        }
    }

    /// Drop the value and failure history so the next `get` refreshes unconditionally.
    ///
    /// A refresh already running still returns its outcome to its callers,
    /// but that outcome is not cached.
    pub async fn invalidate(&self) {
        let mut slot = self.slot.write().await;
        *slot = Slot {
            generation: slot.generation.wrapping_add(1),
            ..Slot::empty()
        };
        drop(slot);
        tracing::debug!(cache = self.name, "Invalidated cached value");
    }

    async fn decide<P>(&self, accept: &P) -> Decision<T>
    where
        P: Fn(&T) -> bool,
    {
        self.slot
            .read()
            .await
            .decide(Instant::now(), &self.config, accept)
    }

    async fn generation(&self) -> u64 {
        self.slot.read().await.generation
    }

    async fn record<P>(&self, generation: u64, outcome: Result<T>, accept: &P) -> Result<T>
    where
        P: Fn(&T) -> bool,
    {
        let now = Instant::now();
        let mut slot = self.slot.write().await;
        if slot.generation != generation {
            tracing::debug!(
                cache = self.name,
                "Value was invalidated during refresh, not storing result"
            );
            return outcome;
        }
        slot.last_attempt_at = Some(now);

        match outcome {
            Ok(value) => {
                slot.value = Some((value.clone(), now));
                slot.last_error = None;
                metrics::record_refresh(self.name, metrics::OUTCOME_SUCCESS);
                Ok(value)
            }
            Err(error) => {
                slot.last_error = Some(error.clone());
                let fallback = slot
                    .value
                    .as_ref()
                    .map(|(value, _)| value)
                    .filter(|value| accept(value))
                    .cloned();
                match fallback {
                    Some(value) if error.is_upstream_failure() => {
                        metrics::record_refresh(self.name, metrics::OUTCOME_STALE);
                        tracing::warn!(
                            cache = self.name,
                            error = %error,
                            "Refresh failed, serving previous value"
                        );
                        Ok(value)
                    }
                    _ => {
                        metrics::record_refresh(self.name, metrics::OUTCOME_FAILURE);
                        tracing::warn!(cache = self.name, error = %error, "Refresh failed");
                        Err(error)
                    }
                }
            }
        }
    }
}
