use super::types::{CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState};
use crate::metrics;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker for a single backend
///
/// Closed-state outcomes are kept in a count-based rolling window. The state lock is
/// never held across an await: callers take a [`CallPermit`], run the call, then
/// report the outcome through it.
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Configuration
    config: CircuitBreakerConfig,
    /// Current state
    state: Mutex<State>,
    /// Instance name used in logs and metrics
    name: String,
}

#[derive(Debug)]
struct State {
    /// Current circuit state
    circuit_state: CircuitState,
    /// Bumped on every transition; outcomes from an older epoch are ignored
    epoch: u64,
    /// Last outcomes in closed state, `true` = failure
    outcomes: VecDeque<bool>,
    /// Failures currently inside `outcomes`
    window_failures: u32,
    /// Trial calls admitted in half-open state (in flight or succeeded)
    half_open_admitted: u32,
    /// Trial calls that succeeded in half-open state
    half_open_successes: u32,
    /// Time when the circuit was opened
    opened_at: Option<Instant>,
    /// Metrics
    metrics: CircuitBreakerMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    Timeout,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(
            name = %name,
            failure_rate_threshold = config.failure_rate_threshold,
            sliding_window_size = config.sliding_window_size,
            minimum_number_of_calls = config.minimum_number_of_calls,
            wait_ms = config.wait_duration_in_open_state_ms,
            "Creating circuit breaker"
        );
        metrics::record_circuit_breaker_state(&name, CircuitState::Closed.as_gauge());

        Self {
            config,
            state: Mutex::new(State {
                circuit_state: CircuitState::Closed,
                epoch: 0,
                outcomes: VecDeque::new(),
                window_failures: 0,
                half_open_admitted: 0,
                half_open_successes: 0,
                opened_at: None,
                metrics: CircuitBreakerMetrics::default(),
            }),
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask to run one call; `None` means the call must be rejected without reaching the backend
    pub fn try_acquire(&self) -> Option<CallPermit<'_>> {
        let mut state = self.state.lock();

        if state.circuit_state == CircuitState::Open {
            let waited = state
                .opened_at
                .map(|opened_at| opened_at.elapsed() >= self.config.wait_duration_in_open_state())
                .unwrap_or(true);

            if !waited {
                state.metrics.rejected_requests += 1;
                debug!(name = %self.name, "Circuit breaker open, rejecting call");
                return None;
            }

            self.transition(&mut state, CircuitState::HalfOpen);
        }

        if state.circuit_state == CircuitState::HalfOpen {
            if state.half_open_admitted >= self.config.permitted_calls_in_half_open_state {
                state.metrics.rejected_requests += 1;
                debug!(name = %self.name, "Max half-open calls reached, rejecting");
                return None;
            }
            state.half_open_admitted += 1;
            debug!(
                name = %self.name,
                admitted = state.half_open_admitted,
                max = self.config.permitted_calls_in_half_open_state,
                "Allowing half-open trial call"
            );
        }

        state.metrics.total_requests += 1;

        Some(CallPermit {
            breaker: self,
            epoch: state.epoch,
            settled: false,
        })
    }

    /// Get current state
    pub fn state(&self) -> CircuitState {
        self.state.lock().circuit_state
    }

    /// Get metrics
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        self.state.lock().metrics.clone()
    }

    fn on_outcome(&self, epoch: u64, outcome: Outcome) {
        let mut state = self.state.lock();

        match outcome {
            Outcome::Success => state.metrics.successful_requests += 1,
            Outcome::Failure => state.metrics.failed_requests += 1,
            Outcome::Timeout => {
                state.metrics.failed_requests += 1;
                state.metrics.timeout_count += 1;
            }
        }

        if state.epoch != epoch {
            debug!(name = %self.name, "Ignoring outcome of a call admitted before the last transition");
            return;
        }

        let failed = outcome != Outcome::Success;

        match state.circuit_state {
            CircuitState::Closed => {
                state.outcomes.push_back(failed);
                if failed {
                    state.window_failures += 1;
                }
                while state.outcomes.len() > self.config.sliding_window_size as usize {
                    if state.outcomes.pop_front() == Some(true) {
                        state.window_failures -= 1;
                    }
                }

                let recorded = state.outcomes.len() as u32;
                let required = self
                    .config
                    .minimum_number_of_calls
                    .min(self.config.sliding_window_size)
                    .max(1);

                if recorded >= required {
                    let failure_rate = state.window_failures as f64 * 100.0 / recorded as f64;
                    if failure_rate >= self.config.failure_rate_threshold {
                        warn!(
                            name = %self.name,
                            failure_rate,
                            threshold = self.config.failure_rate_threshold,
                            "Failure rate above threshold"
                        );
                        self.transition(&mut state, CircuitState::Open);
                    }
                }
            }
            CircuitState::HalfOpen => {
                if failed {
                    warn!(name = %self.name, "Half-open trial call failed, reopening circuit");
                    self.transition(&mut state, CircuitState::Open);
                } else {
                    state.half_open_successes += 1;
                    if state.half_open_successes >= self.config.permitted_calls_in_half_open_state {
                        self.transition(&mut state, CircuitState::Closed);
                    }
                }
            }
            CircuitState::Open => {
                debug!(name = %self.name, "Recording outcome in open state");
            }
        }
    }

    /// A permit dropped without an outcome frees its half-open slot
    fn on_abandoned(&self, epoch: u64) {
        let mut state = self.state.lock();
        if state.epoch == epoch && state.circuit_state == CircuitState::HalfOpen {
            state.half_open_admitted = state.half_open_admitted.saturating_sub(1);
            debug!(name = %self.name, "Half-open trial call abandoned");
        }
    }

    fn transition(&self, state: &mut State, to: CircuitState) {
        let from = state.circuit_state;
        info!(name = %self.name, from = %from, to = %to, "Circuit breaker state transition");

        state.circuit_state = to;
        state.epoch += 1;
        state.outcomes.clear();
        state.window_failures = 0;
        state.half_open_admitted = 0;
        state.half_open_successes = 0;

        match to {
            CircuitState::Open => {
                state.opened_at = Some(Instant::now());
                state.metrics.circuit_opened_count += 1;
            }
            CircuitState::HalfOpen => {
                state.metrics.circuit_half_opened_count += 1;
            }
            CircuitState::Closed => {
                state.opened_at = None;
                state.metrics.circuit_closed_count += 1;
            }
        }

        metrics::record_circuit_breaker_state(&self.name, to.as_gauge());
        metrics::record_circuit_breaker_transition(&self.name, &from.to_string(), &to.to_string());
    }
}

/// Admission to make one call through a [`CircuitBreaker`]
///
/// Report exactly one outcome. Dropping the permit without one (the caller was
/// cancelled) records nothing and frees the half-open slot.
#[derive(Debug)]
#[must_use = "report the call outcome through the permit"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    epoch: u64,
    settled: bool,
}

impl CallPermit<'_> {
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_outcome(self.epoch, Outcome::Success);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_outcome(self.epoch, Outcome::Failure);
    }

    pub fn timeout(mut self) {
        self.settled = true;
        self.breaker.on_outcome(self.epoch, Outcome::Timeout);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_abandoned(self.epoch);
        }
    }
}
