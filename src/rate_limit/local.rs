use super::backend::RateLimiterBackend;
use super::types::Limit;
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Local (in-memory) rate limiter using an interval-refilled token bucket per key
#[derive(Default)]
pub struct LocalRateLimiter {
    /// Buckets per partition key, created on first use and kept for the process lifetime
    buckets: DashMap<String, Arc<Mutex<TokenBucket>>>,
}

impl LocalRateLimiter {
    /// Create a new local rate limiter
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket(&self, key: &str, limit: &Limit) -> Arc<Mutex<TokenBucket>> {
        if let Some(bucket) = self.buckets.get(key) {
            return bucket.clone();
        }

        // The entry lock makes creation race-free: concurrent first touches share one bucket
        self.buckets
            .entry(key.to_string())
            .or_insert_with(|| {
                debug!(key = %key, capacity = limit.capacity(), "Creating token bucket");
                Arc::new(Mutex::new(TokenBucket::new(limit, Instant::now())))
            })
            .clone()
    }

    /// Get the number of active buckets (for testing/monitoring)
    pub fn active_buckets(&self) -> usize {
        self.buckets.len()
    }
}

#[async_trait]
impl RateLimiterBackend for LocalRateLimiter {
    async fn try_consume(&self, key: &str, permits: u32, limit: &Limit) -> Result<bool> {
        let bucket = self.bucket(key, limit);
        let allowed = bucket.lock().try_consume(permits as u64, Instant::now());

        if !allowed {
            debug!(key = %key, "Token bucket exhausted");
        }

        Ok(allowed)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Token bucket topped up to capacity once per window, counted from creation
#[derive(Debug)]
struct TokenBucket {
    capacity: u64,
    tokens: u64,
    window: Duration,
    next_refill: Instant,
}

impl TokenBucket {
    fn new(limit: &Limit, now: Instant) -> Self {
        Self {
            capacity: limit.capacity() as u64,
            tokens: limit.capacity() as u64,
            window: limit.window(),
            next_refill: now + limit.window(),
        }
    }

    fn refill(&mut self, now: Instant) {
        if now < self.next_refill {
            return;
        }

        // Skip every boundary passed while idle; each one refills the full capacity
        let overdue = now.duration_since(self.next_refill);
        let periods = (overdue.as_nanos() / self.window.as_nanos()) as u32 + 1;
        self.tokens = self.capacity;
        self.next_refill += self.window * periods;
    }

    fn try_consume(&mut self, permits: u64, now: Instant) -> bool {
        self.refill(now);

        if self.tokens >= permits {
            self.tokens -= permits;
            true
        } else {
            false
        }
    }
}
