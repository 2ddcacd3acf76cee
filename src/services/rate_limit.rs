use redis::AsyncCommands;
use std::time::Duration;

const KEY_PREFIX: &str = "newsletter:attempts";

/// Decision for one attempt against the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Attempts left in the current window (0 when blocked).
    pub remaining: u32,
    /// Seconds until the window resets, set when blocked.
    pub retry_after_secs: Option<u64>,
}

/// Redis-backed fixed-window attempt limiter.
///
/// Counters live in Redis with a TTL, so process restarts do not reset a
/// window and every instance shares one view of it.
pub struct RateLimiter {
    client: redis::Client,
    max_attempts: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(redis_url: &str, max_attempts: u32, window: Duration) -> Result<Self, RateLimitError> {
        let client = redis::Client::open(redis_url).map_err(RateLimitError::Redis)?;
        Ok(Self {
            client,
            max_attempts,
            window,
        })
    }

    /// Count one attempt for `key` and decide whether it may proceed.
    pub async fn check(&self, key: &str) -> Result<RateDecision, RateLimitError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(RateLimitError::Redis)?;
        let counter = format!("{}:{}", KEY_PREFIX, key);

        let count: u32 = conn.incr(&counter, 1).await.map_err(RateLimitError::Redis)?;
        if count == 1 {
            // First attempt opens the window.
            conn.expire::<_, ()>(&counter, self.window.as_secs() as i64)
                .await
                .map_err(RateLimitError::Redis)?;
        }

        if count > self.max_attempts {
            let ttl: i64 = conn.ttl(&counter).await.map_err(RateLimitError::Redis)?;
            Ok(RateDecision {
                allowed: false,
                remaining: 0,
                retry_after_secs: Some(ttl.max(0) as u64),
            })
        } else {
            Ok(RateDecision {
                allowed: true,
                remaining: self.max_attempts - count,
                retry_after_secs: None,
            })
        }
    }

    /// Clear the window for `key`.
    pub async fn reset(&self, key: &str) -> Result<(), RateLimitError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(RateLimitError::Redis)?;
        let counter = format!("{}:{}", KEY_PREFIX, key);
        conn.del::<_, ()>(&counter)
            .await
            .map_err(RateLimitError::Redis)?;
        Ok(())
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), RateLimitError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(RateLimitError::Redis)?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(RateLimitError::Redis)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}
