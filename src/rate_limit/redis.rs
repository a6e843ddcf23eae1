use super::backend::RateLimiterBackend;
use super::lua_scripts::{fixed_window_granted, FIXED_WINDOW_SCRIPT};
use super::types::Limit;
use crate::error::{ProxyError, Result};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, Script};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error};

/// Redis-backed distributed rate limiter using calendar-aligned fixed windows
///
/// All state lives in Redis; the check-and-increment is a single Lua script.
#[derive(Clone)]
pub struct RedisRateLimiter {
    /// Redis connection manager (cheap to clone, reconnects on its own)
    connection: ConnectionManager,
    script: Script,
}

impl RedisRateLimiter {
    /// Connect to Redis
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| ProxyError::Config(format!("Invalid Redis URL: {}", e)))?;
        let connection = ConnectionManager::new(client).await.map_err(|e| {
            ProxyError::RateLimiterBackend(format!("Failed to connect to Redis: {}", e))
        })?;

        Ok(Self::with_connection(connection))
    }

    pub fn with_connection(connection: ConnectionManager) -> Self {
        Self {
            connection,
            script: Script::new(FIXED_WINDOW_SCRIPT),
        }
    }

    /// Test Redis connection
    pub async fn ping(&self) -> Result<()> {
        let mut connection = self.connection.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut connection)
            .await
            .map(|_| ())
            .map_err(|e| ProxyError::RateLimiterBackend(format!("Redis ping failed: {}", e)))
    }
}

#[async_trait]
impl RateLimiterBackend for RedisRateLimiter {
    async fn try_consume(&self, key: &str, permits: u32, limit: &Limit) -> Result<bool> {
        let window = FixedWindow::at(now_millis(), limit.window_millis());
        let counter_key = window.counter_key(key);
        let mut connection = self.connection.clone();

        let total = self
            .script
            .key(&counter_key)
            .arg(permits)
            .arg(window.ttl_ms)
            .arg(limit.capacity())
            .invoke_async::<_, i64>(&mut connection)
            .await
            .map_err(|e| {
                error!(key = %counter_key, error = %e, "Redis error during rate limit check");
                ProxyError::RateLimiterBackend(e.to_string())
            })?;

        debug!(
            key = %counter_key,
            total,
            capacity = limit.capacity(),
            "Fixed window check"
        );

        Ok(fixed_window_granted(total))
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Position of an instant inside its calendar-aligned window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWindow {
    pub start_ms: u64,
    pub ttl_ms: u64,
}

impl FixedWindow {
    pub fn at(now_ms: u64, window_ms: u64) -> Self {
        let window_ms = window_ms.max(1);
        let start_ms = (now_ms / window_ms) * window_ms;

        Self {
            start_ms,
            ttl_ms: window_ms - (now_ms % window_ms),
        }
    }

    pub fn counter_key(&self, key: &str) -> String {
        format!("rl:{}:{}", key, self.start_ms)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
