pub mod breaker;
pub mod types;

pub use breaker::{CallPermit, CircuitBreaker};
pub use types::{CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState};
