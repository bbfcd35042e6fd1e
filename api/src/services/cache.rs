use std::sync::Arc;

use async_trait::async_trait;
use mio_core::cache::{Clock, SystemClock, TtlCache};
use mio_core::policy::FailurePolicy;
use sqlx::PgPool;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for CacheError {
    fn from(err: sqlx::Error) -> Self {
        CacheError::Unavailable(err.to_string())
    }
}

/// Raw cache backend. Expired entries must read as absent.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), CacheError>;
    /// Drop expired entries; returns how many were removed.
    async fn purge_expired(&self) -> Result<u64, CacheError>;
}

/// Backend on the `ai_response_cache` table. Last write wins.
pub struct PgResponseCache {
    pool: PgPool,
}

impl PgResponseCache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResponseCache for PgResponseCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let value = sqlx::query_scalar::<_, String>(
            r#"
            SELECT value
            FROM ai_response_cache
            WHERE cache_key = $1
              AND expires_at > NOW()
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), CacheError> {
        sqlx::query(
            r#"
            INSERT INTO ai_response_cache (cache_key, value, expires_at)
            VALUES ($1, $2, NOW() + make_interval(secs => $3))
            ON CONFLICT (cache_key)
            DO UPDATE SET value = EXCLUDED.value,
                          expires_at = EXCLUDED.expires_at,
                          updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(ttl_seconds as f64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, CacheError> {
        let result = sqlx::query("DELETE FROM ai_response_cache WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// In-process backend for single-instance deployments and tests.
pub struct MemoryResponseCache<C: Clock = SystemClock> {
    inner: TtlCache<C>,
}

impl MemoryResponseCache<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for MemoryResponseCache<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> MemoryResponseCache<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            inner: TtlCache::with_clock(clock),
        }
    }
}

#[async_trait]
impl<C: Clock + 'static> ResponseCache for MemoryResponseCache<C> {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.inner.get(key))
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), CacheError> {
        self.inner.set(key, value, ttl_seconds);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, CacheError> {
        Ok(self.inner.purge_expired() as u64)
    }
}

/// One sweep of expired entries. Failures are logged and count as zero.
pub async fn sweep_expired(backend: &dyn ResponseCache, policy: FailurePolicy) -> u64 {
    let result = backend.purge_expired().await;
    match policy.apply("response_cache.purge", result, 0) {
        Ok(purged) => purged,
        Err(err) => {
            tracing::error!(error = %err, "cache sweep failed");
            0
        }
    }
}

/// Cache front used by handlers: applies the failure policy so an
/// unavailable backend reads as a miss instead of failing the request.
pub struct CacheService {
    backend: Arc<dyn ResponseCache>,
    policy: FailurePolicy,
    default_ttl_seconds: u64,
}

impl CacheService {
    pub fn new(backend: Arc<dyn ResponseCache>, policy: FailurePolicy, default_ttl_seconds: u64) -> Self {
        Self {
            backend,
            policy,
            default_ttl_seconds,
        }
    }

    pub fn default_ttl_seconds(&self) -> u64 {
        self.default_ttl_seconds
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let result = self.backend.get(key).await;
        self.policy.apply("response_cache.get", result, None)
    }

    pub async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), CacheError> {
        let result = self.backend.set(key, value, ttl_seconds).await;
        self.policy.apply("response_cache.set", result, ())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use mio_core::cache::ManualClock;

    use super::*;
    use crate::testing::UnavailableCache;

    #[tokio::test]
    async fn memory_backend_round_trips_and_expires() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 10, 9, 0, 0).unwrap());
        let service = CacheService::new(
            Arc::new(MemoryResponseCache::with_clock(clock.clone())),
            FailurePolicy::FailOpen,
            60,
        );

        service.set("mio:u1:chat:abc", "cached reply", 60).await.unwrap();
        assert_eq!(
            service.get("mio:u1:chat:abc").await.unwrap().as_deref(),
            Some("cached reply")
        );

        clock.advance(Duration::seconds(61));
        assert_eq!(service.get("mio:u1:chat:abc").await.unwrap(), None);
    }

    #[tokio::test]
    async fn fail_open_treats_backend_errors_as_miss() {
        let service = CacheService::new(Arc::new(UnavailableCache), FailurePolicy::FailOpen, 60);
        assert_eq!(service.get("k").await.unwrap(), None);
        assert!(service.set("k", "v", 60).await.is_ok());
    }

    #[tokio::test]
    async fn fail_closed_surfaces_backend_errors() {
        let service = CacheService::new(Arc::new(UnavailableCache), FailurePolicy::FailClosed, 60);
        assert!(service.get("k").await.is_err());
        assert!(service.set("k", "v", 60).await.is_err());
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_entries() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 10, 9, 0, 0).unwrap());
        let cache = MemoryResponseCache::with_clock(clock.clone());
        cache.set("short", "1", 1).await.unwrap();
        cache.set("long", "2", 3600).await.unwrap();
        clock.advance(Duration::seconds(2));

        assert_eq!(sweep_expired(&cache, FailurePolicy::FailOpen).await, 1);
        assert_eq!(cache.inner.len(), 1);
        assert_eq!(cache.get("long").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn sweep_of_unavailable_backend_reports_nothing_purged() {
        assert_eq!(sweep_expired(&UnavailableCache, FailurePolicy::FailOpen).await, 0);
        assert_eq!(sweep_expired(&UnavailableCache, FailurePolicy::FailClosed).await, 0);
    }
}
