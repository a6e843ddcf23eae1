use crate::error::{ProxyError, Result};
use std::time::Duration;

/// Retry-After hint used by rules that do not configure their own
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// A quota: `capacity` permits per `window`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Limit {
    capacity: u32,
    window: Duration,
}

impl Limit {
    /// Create a new limit, rejecting a zero capacity or an empty window
    pub fn new(capacity: u32, window: Duration) -> Result<Self> {
        if capacity == 0 {
            return Err(ProxyError::Config(
                "Limit capacity must be at least 1".to_string(),
            ));
        }
        if window.is_zero() {
            return Err(ProxyError::Config(
                "Limit window must be greater than zero".to_string(),
            ));
        }

        Ok(Self { capacity, window })
    }

    /// `capacity` permits per minute
    pub fn per_minute(capacity: u32) -> Result<Self> {
        Self::new(capacity, Duration::from_secs(60))
    }

    /// `capacity` permits every `seconds` seconds
    pub fn per_seconds(capacity: u32, seconds: u64) -> Result<Self> {
        Self::new(capacity, Duration::from_secs(seconds))
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Window length in milliseconds, never zero
    pub fn window_millis(&self) -> u64 {
        (self.window.as_millis() as u64).max(1)
    }
}

/// Outcome of evaluating rate limit rules against a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed
    Allow,
    /// The request is rejected by the named rule
    Block {
        rule: String,
        retry_after: Option<u64>,
    },
}

impl Decision {
    pub fn allow() -> Self {
        Decision::Allow
    }

    pub fn block(rule: impl Into<String>, retry_after: Option<u64>) -> Self {
        Decision::Block {
            rule: rule.into(),
            retry_after,
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    /// Name of the blocking rule, if any
    pub fn rule(&self) -> Option<&str> {
        match self {
            Decision::Allow => None,
            Decision::Block { rule, .. } => Some(rule),
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Decision::Allow => None,
            Decision::Block { retry_after, .. } => *retry_after,
        }
    }
}
