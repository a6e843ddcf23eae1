use crate::domain::{ForwardRequest, RequestContext};
use crate::error::{ProxyError, Result};
use crate::forwarding::ForwardingService;
use crate::metrics;
use crate::observability::{LogThrottle, RequestId};
use crate::transform::{strip_hop_by_hop, HeaderPolicy, REQUEST_ID_HEADER};
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

const CIRCUIT_OPEN_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Proxy handler state
#[derive(Clone)]
pub struct ProxyState {
    /// Backend base URL without a trailing slash
    base_url: Arc<str>,
    forwarding: Arc<dyn ForwardingService>,
    header_policy: Arc<dyn HeaderPolicy>,
    max_body_bytes: usize,
    circuit_open_log: Arc<LogThrottle>,
}

impl ProxyState {
    pub fn new(
        base_url: &str,
        forwarding: Arc<dyn ForwardingService>,
        header_policy: Arc<dyn HeaderPolicy>,
        max_body_bytes: usize,
    ) -> Self {
        Self {
            base_url: Arc::from(base_url.trim_end_matches('/')),
            forwarding,
            header_policy,
            max_body_bytes,
            circuit_open_log: Arc::new(LogThrottle::new(CIRCUIT_OPEN_LOG_INTERVAL)),
        }
    }

    /// Backend URL for an inbound URI: base URL + raw path + raw query
    pub fn target_url(&self, uri: &Uri) -> String {
        match uri.query() {
            Some(query) => format!("{}{}?{}", self.base_url, uri.path(), query),
            None => format!("{}{}", self.base_url, uri.path()),
        }
    }
}

/// Forwards every request that reaches it to the backend
///
/// Rate limiting has already run as middleware; this handler reads the body,
/// applies the header policy and writes the backend's answer back.
pub async fn proxy_handler(State(state): State<ProxyState>, req: Request) -> Response {
    let timer = metrics::Timer::start(req.method().as_str());
    let (parts, body) = req.into_parts();

    let request_id = parts
        .extensions
        .get::<RequestId>()
        .map(|RequestId(id)| id.clone())
        .or_else(|| inbound_request_id(&parts.headers))
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let ctx = RequestContext::new(
        request_id,
        parts.method.clone(),
        state.target_url(&parts.uri),
        parts.headers.clone(),
    );

    info!(
        trace_id = %ctx.trace_id,
        request_id = %ctx.request_id,
        method = %ctx.method,
        target = %ctx.target_url,
        headers = ?masked_headers(&ctx.inbound_headers),
        "Inbound request"
    );

    let response = if ctx.method == Method::OPTIONS {
        StatusCode::OK.into_response()
    } else {
        match forward(&state, &ctx, body).await {
            Ok(response) => response,
            Err(e) => {
                log_failure(&state, &ctx, &e);
                e.into_response()
            }
        }
    };

    debug!(
        trace_id = %ctx.trace_id,
        status = response.status().as_u16(),
        latency_ms = ctx.elapsed_ms(),
        "Request completed"
    );
    timer.record(response.status().as_u16());

    response
}

async fn forward(state: &ProxyState, ctx: &RequestContext, body: Body) -> Result<Response> {
    let body = axum::body::to_bytes(body, state.max_body_bytes)
        .await
        .map_err(|e| ProxyError::InvalidRequest(format!("Failed to read request body: {}", e)))?;

    let target_uri = Url::parse(&ctx.target_url)
        .map_err(|e| ProxyError::InvalidRequest(format!("Invalid target URL: {}", e)))?;

    let request = ForwardRequest {
        target_uri,
        method: ctx.method.clone(),
        headers: state
            .header_policy
            .to_backend(&ctx.inbound_headers, &ctx.request_id),
        body,
    };

    let forwarded = state.forwarding.forward(request, ctx).await?;

    let status = StatusCode::from_u16(forwarded.status).map_err(|_| {
        ProxyError::Transport(format!("Backend sent invalid status {}", forwarded.status))
    })?;

    let mut headers = forwarded.headers;
    strip_hop_by_hop(&mut headers);

    let body = if ctx.method == Method::HEAD {
        Body::empty()
    } else {
        Body::from(forwarded.body)
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;

    Ok(response)
}

fn log_failure(state: &ProxyState, ctx: &RequestContext, e: &ProxyError) {
    match e {
        ProxyError::CircuitOpen(name) => {
            if let Some(suppressed) = state.circuit_open_log.check() {
                warn!(
                    trace_id = %ctx.trace_id,
                    request_id = %ctx.request_id,
                    circuit = %name,
                    suppressed,
                    "Circuit open, rejecting request"
                );
            }
        }
        ProxyError::InvalidRequest(_) => {
            warn!(trace_id = %ctx.trace_id, request_id = %ctx.request_id, error = %e, "Invalid request");
        }
        _ => {
            error!(
                trace_id = %ctx.trace_id,
                request_id = %ctx.request_id,
                target = %ctx.target_url,
                latency_ms = ctx.elapsed_ms(),
                error = %e,
                "Request failed"
            );
        }
    }
}

/// Liveness check served under the management prefix
pub async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "UP" }))
}

/// Plain-text liveness check outside the management prefix
pub async fn healthz_handler() -> &'static str {
    "ok"
}

fn inbound_request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// Header name/value pairs for logging, with credentials hidden
fn masked_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let shown = if name == header::AUTHORIZATION {
                "***".to_string()
            } else {
                String::from_utf8_lossy(value.as_bytes()).into_owned()
            };
            (name.as_str().to_string(), shown)
        })
        .collect()
}
