//! Rate limiting module
//!
//! Requests are checked against an ordered list of named rules before they are
//! forwarded. Each rule pairs a [`Condition`] (does the rule apply?) with a
//! [`KeyGenerator`] (which quota is charged?) and a [`Limit`], backed by a
//! shared [`RateLimiterBackend`]:
//!
//! - **Memory**: token bucket per key, refilled to capacity at each window boundary
//! - **Redis**: calendar-aligned fixed window counter, checked atomically in Lua
//!
//! The first rule that rejects a request answers it with `429 Too Many Requests`.
//!
//! # Example
//!
//! ```rust,no_run
//! use forward_proxy::rate_limit::{
//!     Condition, KeyGenerator, Limit, LocalRateLimiter, RateLimitEngine, RuleBuilder,
//! };
//! use std::sync::Arc;
//!
//! let rule = RuleBuilder::named("items_ip")
//!     .when(Condition::path_starts_with("/items"))
//!     .key(KeyGenerator::client_ip())
//!     .limit(Limit::per_minute(10).unwrap())
//!     .backend(Arc::new(LocalRateLimiter::new()))
//!     .build()
//!     .unwrap();
//!
//! let engine = RateLimitEngine::new(vec![rule]);
//! ```

pub mod backend;
pub mod condition;
pub mod engine;
pub mod key;
pub mod local;
pub mod lua_scripts;
pub mod middleware;
pub mod presets;
pub mod redis;
pub mod request;
pub mod rule;
pub mod types;

// Re-export commonly used types
pub use backend::{build_backend, RateLimiterBackend};
pub use condition::Condition;
pub use engine::{RateLimitEngine, DEFAULT_MANAGEMENT_PREFIX};
pub use key::KeyGenerator;
pub use local::LocalRateLimiter;
pub use middleware::rate_limit_middleware;
pub use presets::build_rules;
pub use redis::RedisRateLimiter;
pub use request::InboundRequest;
pub use rule::{RateLimitRule, RuleBuilder};
pub use types::{Decision, Limit, DEFAULT_RETRY_AFTER_SECS};
