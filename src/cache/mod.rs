// Redis cache module
//
// The cache is advisory: every read path tolerates absence, and no write
// depends on a cached value for correctness. The one exception is the token
// revocation set, which lives here by design (constant-time logout).

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Serialize, de::DeserializeOwned};

#[derive(Clone)]
pub struct CacheService {
    conn: ConnectionManager,
}

impl CacheService {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Get a cached value. Absent, unreadable and errored all collapse to None.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut conn = self.conn.clone();
        let result: Option<String> = conn.get(key).await.ok()?;
        result.and_then(|s| serde_json::from_str(&s).ok())
    }

    /// Set a cached value with TTL in seconds.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: u64,
    ) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(value).map_err(|e| {
            redis::RedisError::from((redis::ErrorKind::TypeError, "serialize", e.to_string()))
        })?;
        conn.set_ex(key, json, ttl_seconds).await
    }

    /// Delete a cached value.
    pub async fn delete(&self, key: &str) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.del(key).await
    }

    /// Increment a counter by n, returning the new value.
    pub async fn incr(&self, key: &str, n: i64) -> Result<i64, redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.incr(key, n).await
    }

    /// Check whether a key exists (used by the revocation set).
    pub async fn exists(&self, key: &str) -> bool {
        let mut conn = self.conn.clone();
        conn.exists(key).await.unwrap_or(false)
    }

    /// Fixed-window rate limit check, returns (allowed, remaining, reset_seconds)
    pub async fn check_rate_limit(
        &self,
        key: &str,
        max_requests: u32,
        window_seconds: u64,
    ) -> Result<(bool, u32, u64), redis::RedisError> {
        let mut conn = self.conn.clone();
        let cache_key = format!("ratelimit:{}", key);
        let current: u32 = conn.get(&cache_key).await.unwrap_or(0);

        if current >= max_requests {
            let ttl: i64 = conn.ttl(&cache_key).await.unwrap_or(0);
            return Ok((false, 0, ttl.max(0) as u64));
        }

        let new_count = self.incr(&cache_key, 1).await? as u32;

        if new_count == 1 {
            let _: () = conn.expire(&cache_key, window_seconds as i64).await?;
        }

        let ttl: i64 = conn.ttl(&cache_key).await.unwrap_or(window_seconds as i64);
        let remaining = max_requests.saturating_sub(new_count);

        Ok((true, remaining, ttl.max(0) as u64))
    }

    /// Cache key for the active-events listing
    pub fn events_active_key() -> &'static str {
        "events:active_list"
    }

    /// Cache key for a revoked identity token (value is irrelevant, TTL is not)
    pub fn revoked_token_key(token_hash: &str) -> String {
        format!("revoked:{}", token_hash)
    }

    /// Optional mirror of the persisted featured slots
    pub fn featured_slots_key() -> &'static str {
        "featured:slots"
    }
}
