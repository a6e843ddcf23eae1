use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed,
    /// Circuit is open, requests are rejected
    Open,
    /// Circuit is half-open, allowing trial requests
    HalfOpen,
}

impl CircuitState {
    /// Gauge value: 0 = Closed, 1 = Open, 2 = HalfOpen
    pub fn as_gauge(&self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "Closed"),
            CircuitState::Open => write!(f, "Open"),
            CircuitState::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failure rate (percent) at or above which the circuit opens
    #[serde(default = "default_failure_rate_threshold")]
    pub failure_rate_threshold: f64,

    /// Number of most recent calls kept in the rolling window
    #[serde(default = "default_sliding_window_size")]
    pub sliding_window_size: u32,

    /// Calls that must be recorded before the failure rate is evaluated
    #[serde(default = "default_minimum_number_of_calls")]
    pub minimum_number_of_calls: u32,

    /// Duration to wait in open state before transitioning to half-open
    #[serde(default = "default_wait_duration_in_open_state_ms")]
    pub wait_duration_in_open_state_ms: u64,

    /// Number of trial calls admitted in half-open state
    #[serde(default = "default_permitted_calls_in_half_open_state")]
    pub permitted_calls_in_half_open_state: u32,
}

fn default_failure_rate_threshold() -> f64 {
    50.0
}

fn default_sliding_window_size() -> u32 {
    20
}

fn default_minimum_number_of_calls() -> u32 {
    10
}

fn default_wait_duration_in_open_state_ms() -> u64 {
    30_000
}

fn default_permitted_calls_in_half_open_state() -> u32 {
    3
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: default_failure_rate_threshold(),
            sliding_window_size: default_sliding_window_size(),
            minimum_number_of_calls: default_minimum_number_of_calls(),
            wait_duration_in_open_state_ms: default_wait_duration_in_open_state_ms(),
            permitted_calls_in_half_open_state: default_permitted_calls_in_half_open_state(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn wait_duration_in_open_state(&self) -> Duration {
        Duration::from_millis(self.wait_duration_in_open_state_ms)
    }
}

/// Circuit breaker metrics
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerMetrics {
    /// Total number of admitted calls
    pub total_requests: u64,
    /// Number of successful calls
    pub successful_requests: u64,
    /// Number of failed calls (timeouts included)
    pub failed_requests: u64,
    /// Number of calls rejected without reaching the backend
    pub rejected_requests: u64,
    /// Number of timeouts
    pub timeout_count: u64,
    /// Number of times circuit opened
    pub circuit_opened_count: u64,
    /// Number of times circuit closed
    pub circuit_closed_count: u64,
    /// Number of times circuit half-opened
    pub circuit_half_opened_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "Closed");
        assert_eq!(CircuitState::Open.to_string(), "Open");
        assert_eq!(CircuitState::HalfOpen.to_string(), "HalfOpen");
        assert_eq!(CircuitState::HalfOpen.as_gauge(), 2);
    }

    #[test]
    fn test_default_config() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_rate_threshold, 50.0);
        assert_eq!(config.sliding_window_size, 20);
        assert_eq!(config.minimum_number_of_calls, 10);
        assert_eq!(config.permitted_calls_in_half_open_state, 3);
        assert_eq!(
            config.wait_duration_in_open_state(),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: CircuitBreakerConfig =
            serde_yaml::from_str("failure_rate_threshold: 25").unwrap();
        assert_eq!(config.failure_rate_threshold, 25.0);
        assert_eq!(config.sliding_window_size, 20);
    }
}
