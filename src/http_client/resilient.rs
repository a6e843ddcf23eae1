use super::HttpClientGateway;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::domain::{ForwardRequest, ForwardResponse};
use crate::error::{ProxyError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Wraps a gateway with a hard deadline inside a circuit breaker
///
/// No retries: every call reaches the delegate at most once.
pub struct ResilientHttpClientGateway {
    delegate: Arc<dyn HttpClientGateway>,
    breaker: CircuitBreaker,
    timeout: Duration,
}

impl ResilientHttpClientGateway {
    pub fn new(
        delegate: Arc<dyn HttpClientGateway>,
        name: impl Into<String>,
        breaker_config: CircuitBreakerConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            delegate,
            breaker: CircuitBreaker::new(name, breaker_config),
            timeout,
        }
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

#[async_trait]
impl HttpClientGateway for ResilientHttpClientGateway {
    async fn exchange(&self, request: ForwardRequest) -> Result<ForwardResponse> {
        let permit = self
            .breaker
            .try_acquire()
            .ok_or_else(|| ProxyError::CircuitOpen(self.breaker.name().to_string()))?;

        match tokio::time::timeout(self.timeout, self.delegate.exchange(request)).await {
            Ok(Ok(response)) => {
                permit.success();
                Ok(response)
            }
            Ok(Err(e)) => {
                debug!(name = %self.breaker.name(), error = %e, "Backend call failed");
                match e {
                    ProxyError::UpstreamTimeout(_) => permit.timeout(),
                    _ => permit.failure(),
                }
                Err(e)
            }
            Err(_) => {
                warn!(
                    name = %self.breaker.name(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Backend call exceeded time limit"
                );
                permit.timeout();
                Err(ProxyError::UpstreamTimeout(format!(
                    "No response within {}ms",
                    self.timeout.as_millis()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitState;
    use bytes::Bytes;
    use http::{HeaderMap, Method};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Copy)]
    enum Behaviour {
        Respond(u16),
        Fail,
        Hang,
    }

    struct StubGateway {
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    impl StubGateway {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl HttpClientGateway for StubGateway {
        async fn exchange(&self, _request: ForwardRequest) -> Result<ForwardResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Respond(status) => {
                    Ok(ForwardResponse::new(status, HeaderMap::new(), Bytes::new()))
                }
                Behaviour::Fail => Err(ProxyError::Transport("connection reset".to_string())),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    unreachable!("the time limiter drops this future")
                }
            }
        }
    }

    fn request() -> ForwardRequest {
        ForwardRequest {
            target_uri: "https://api.example.com/items".parse().unwrap(),
            method: Method::GET,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    fn breaker_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_rate_threshold: 50.0,
            sliding_window_size: 2,
            minimum_number_of_calls: 2,
            wait_duration_in_open_state_ms: 60_000,
            permitted_calls_in_half_open_state: 1,
        }
    }

    fn gateway(stub: Arc<StubGateway>) -> ResilientHttpClientGateway {
        ResilientHttpClientGateway::new(
            stub,
            "backend",
            breaker_config(),
            Duration::from_millis(500),
        )
    }

    #[tokio::test]
    async fn test_backend_error_statuses_count_as_success() {
        let stub = StubGateway::new(Behaviour::Respond(500));
        let gateway = gateway(stub.clone());

        for _ in 0..5 {
            assert_eq!(gateway.exchange(request()).await.unwrap().status, 500);
        }
        assert_eq!(gateway.circuit_breaker().state(), CircuitState::Closed);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_maps_to_upstream_timeout_and_counts_failure() {
        let stub = StubGateway::new(Behaviour::Hang);
        let gateway = gateway(stub.clone());

        let result = gateway.exchange(request()).await;
        assert!(matches!(result, Err(ProxyError::UpstreamTimeout(_))));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);

        let metrics = gateway.circuit_breaker().metrics();
        assert_eq!(metrics.timeout_count, 1);
        assert_eq!(metrics.failed_requests, 1);
    }

    #[tokio::test]
    async fn test_open_circuit_rejects_without_calling_backend() {
        let stub = StubGateway::new(Behaviour::Fail);
        let gateway = gateway(stub.clone());

        for _ in 0..2 {
            assert!(matches!(
                gateway.exchange(request()).await,
                Err(ProxyError::Transport(_))
            ));
        }
        assert_eq!(gateway.circuit_breaker().state(), CircuitState::Open);

        let result = gateway.exchange(request()).await;
        assert!(matches!(result, Err(ProxyError::CircuitOpen(name)) if name == "backend"));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 2);
    }
}
