use super::engine::RateLimitEngine;
use super::request::InboundRequest;
use super::types::Decision;
use crate::error::ProxyError;
use crate::metrics;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, error};

/// Axum middleware function for rate limiting
///
/// Runs every rule before the proxy handler; a blocked request gets an empty 429
/// and never reaches the backend.
pub async fn rate_limit_middleware(
    State(engine): State<Arc<RateLimitEngine>>,
    request: Request,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();
    let decision = engine.evaluate(&InboundRequest::from_parts(&parts)).await;

    match decision {
        Ok(Decision::Allow) => next.run(Request::from_parts(parts, body)).await,
        Ok(Decision::Block { rule, retry_after }) => {
            debug!(
                rule = %rule,
                method = %parts.method,
                path = %parts.uri.path(),
                "Rate limit exceeded"
            );
            metrics::record_rate_limit_rejection(&rule);
            ProxyError::RateLimitExceeded { rule, retry_after }.into_response()
        }
        Err(e) => {
            error!(error = %e, path = %parts.uri.path(), "Rate limit evaluation failed");
            e.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::condition::Condition;
    use crate::rate_limit::key::KeyGenerator;
    use crate::rate_limit::local::LocalRateLimiter;
    use crate::rate_limit::rule::RateLimitRule;
    use crate::rate_limit::types::Limit;
    use axum::{body::Body, middleware::from_fn_with_state, Router};
    use http::{Method, StatusCode};
    use tower::ServiceExt;

    fn app(capacity: u32) -> Router {
        let rule = RateLimitRule::builder("items_ip")
            .when(Condition::path_starts_with("/items"))
            .key(KeyGenerator::client_ip())
            .limit(Limit::per_minute(capacity).unwrap())
            .backend(Arc::new(LocalRateLimiter::new()))
            .build()
            .unwrap();
        let engine = Arc::new(RateLimitEngine::new(vec![rule]));

        Router::new()
            .fallback(|| async { "ok" })
            .layer(from_fn_with_state(engine, rate_limit_middleware))
    }

    fn get(path: &str) -> Request {
        Request::builder()
            .uri(path)
            .header("x-forwarded-for", "203.0.113.7")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_blocks_with_retry_after_and_empty_body() {
        let app = app(1);

        let response = app.clone().oneshot(get("/items")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(get("/items")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("Retry-After").unwrap(), "60");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_options_passes_through() {
        let app = app(1);

        for _ in 0..3 {
            let request = Request::builder()
                .method(Method::OPTIONS)
                .uri("/items")
                .body(Body::empty())
                .unwrap();
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }
}
