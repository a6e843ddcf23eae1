pub mod circuit_breaker;
pub mod config;
pub mod domain;
pub mod error;
pub mod forwarding;
pub mod http_client;
pub mod metrics;
pub mod observability;
pub mod proxy;
pub mod rate_limit;
pub mod transform;

use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::forwarding::{DefaultForwardingService, ForwardingService, LoggingForwardingService};
use crate::http_client::{HttpClientGateway, ReqwestHttpClient, ResilientHttpClientGateway};
use crate::metrics::{metrics_handler, stats_handler, MetricsService};
use crate::observability::request_id_middleware;
use crate::proxy::{health_handler, healthz_handler, proxy_handler, ProxyState};
use crate::rate_limit::{build_backend, build_rules, rate_limit_middleware, RateLimitEngine};
use crate::transform::{normalize_path_middleware, DefaultHeaderPolicy, HeaderPolicy};
use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

/// Assemble the proxy application from configuration
///
/// Layers, outermost first: tracing, request id, CORS (when enabled), path
/// normalization, rate limiting.
/// Management routes live under the rate limiter's management prefix; every other
/// path falls through to the proxy handler.
pub async fn build_app(config: &ProxyConfig, metrics: Option<MetricsService>) -> Result<Router> {
    let engine = Arc::new(build_engine(config).await?);
    let header_policy: Arc<dyn HeaderPolicy> = Arc::new(DefaultHeaderPolicy);
    let forwarding = build_forwarding(config, header_policy.clone())?;

    let state = ProxyState::new(
        &config.backend.base_url,
        forwarding,
        header_policy,
        config.server.max_body_bytes,
    );

    let prefix = config.rate_limiter.management_prefix.trim_end_matches('/');
    let mut management = Router::new()
        .route(&format!("{}/health", prefix), get(health_handler))
        .route(&format!("{}/proxystats", prefix), get(stats_handler))
        .route("/healthz", get(healthz_handler));
    if let Some(service) = metrics {
        management = management.merge(
            Router::new()
                .route(&format!("{}/prometheus", prefix), get(metrics_handler))
                .with_state(service),
        );
    }

    let mut app = Router::new()
        .fallback(proxy_handler)
        .with_state(state)
        .merge(management)
        .layer(from_fn_with_state(engine, rate_limit_middleware))
        .layer(from_fn(normalize_path_middleware));

    if config.server.cors_enabled {
        app = app.layer(CorsLayer::permissive());
    }

    Ok(app
        .layer(from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http()))
}

async fn build_engine(config: &ProxyConfig) -> Result<RateLimitEngine> {
    let limiter = &config.rate_limiter;
    if !limiter.enabled {
        info!("Rate limiting disabled");
        return Ok(RateLimitEngine::disabled());
    }

    let backend = build_backend(limiter).await?;
    let rules = build_rules(limiter, backend.clone())?;

    info!(
        backend = backend.name(),
        rules = rules.len(),
        "Rate limiting enabled"
    );
    for rule in &rules {
        info!(
            rule = %rule.name(),
            capacity = rule.limit().capacity(),
            window_ms = rule.limit().window().as_millis() as u64,
            "Loaded rate limit rule"
        );
    }

    Ok(RateLimitEngine::with_management_prefix(
        rules,
        limiter.management_prefix.clone(),
    ))
}

fn build_forwarding(
    config: &ProxyConfig,
    header_policy: Arc<dyn HeaderPolicy>,
) -> Result<Arc<dyn ForwardingService>> {
    let client = ReqwestHttpClient::new(config.backend.connect_timeout())?;
    let resilience = &config.forwarding.resilience;

    let gateway: Arc<dyn HttpClientGateway> = if resilience.enabled {
        info!(
            name = %resilience.instance_name,
            timeout_ms = resilience.timeout_ms,
            "Resilient forwarding enabled"
        );
        Arc::new(ResilientHttpClientGateway::new(
            Arc::new(client),
            resilience.instance_name.clone(),
            resilience.circuit_breaker.clone(),
            resilience.timeout(),
        ))
    } else {
        Arc::new(client)
    };

    let core: Arc<dyn ForwardingService> =
        Arc::new(DefaultForwardingService::new(gateway, header_policy));

    if config.forwarding.logging_enabled {
        Ok(Arc::new(LoggingForwardingService::new(core)))
    } else {
        Ok(core)
    }
}

/// Validate configuration, bind and serve until the process stops
pub async fn init_proxy(config: ProxyConfig) -> Result<()> {
    config.validate()?;

    info!(backend = %config.backend.base_url, "Starting forward proxy");

    let metrics = MetricsService::new()?;
    let app = build_app(&config, Some(metrics)).await?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(address = %addr, "Proxy ready to accept connections");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| ProxyError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}
