//! Quota store abstraction shared by the local and distributed limiters.

use super::local::LocalRateLimiter;
use super::redis::RedisRateLimiter;
use super::types::Limit;
use crate::config::{BackendKind, RateLimiterConfig};
use crate::error::{ProxyError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Stateful quota store keyed by partition key.
///
/// Implementations must be safe for any number of concurrent callers on the same key:
/// no more than `limit.capacity()` permits may be granted per key and window.
#[async_trait]
pub trait RateLimiterBackend: Send + Sync {
    /// Try to take `permits` from the quota of `key`; `Ok(false)` means rejected.
    async fn try_consume(&self, key: &str, permits: u32, limit: &Limit) -> Result<bool>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Build the backend selected in configuration
pub async fn build_backend(config: &RateLimiterConfig) -> Result<Arc<dyn RateLimiterBackend>> {
    match config.backend {
        BackendKind::Memory => {
            info!("Initializing in-memory rate limiter backend");
            Ok(Arc::new(LocalRateLimiter::new()))
        }
        BackendKind::Redis => {
            let url = config
                .redis
                .as_ref()
                .map(|r| r.url.as_str())
                .ok_or_else(|| {
                    ProxyError::Config("Redis backend selected but no redis.url set".to_string())
                })?;

            info!("Initializing Redis rate limiter backend");
            let limiter = RedisRateLimiter::connect(url).await?;
            Ok(Arc::new(limiter))
        }
    }
}
