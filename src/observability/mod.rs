use crate::config::LogFormat;
use crate::error::{ProxyError, Result};
use crate::transform::REQUEST_ID_HEADER;
use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, Span};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const DEFAULT_FILTER: &str = "forward_proxy=info,tower_http=info";

/// Initialize the global tracing subscriber
pub fn init_tracing(format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());

    let installed = match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .with_current_span(false)
            .try_init(),
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .try_init(),
    };
    installed.map_err(|e| ProxyError::Internal(format!("Failed to install tracing subscriber: {}", e)))?;

    info!(format = ?format, "Tracing initialized");
    Ok(())
}

/// Request ID extension type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Resolve the request id once: keep a non-blank inbound `X-Request-Id`, else generate one
///
/// The resolved id is written back onto the request so every later stage sees the same
/// value, and added to any response that does not already carry one.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let inbound = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());

    let request_id = inbound.unwrap_or_else(|| Uuid::new_v4().to_string());

    Span::current().record("request_id", request_id.as_str());

    let header_value = HeaderValue::from_str(&request_id).ok();
    if let Some(value) = &header_value {
        req.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
    }
    req.extensions_mut().insert(RequestId(request_id));

    let mut response = next.run(req).await;

    if let Some(value) = header_value {
        if !response.headers().contains_key(REQUEST_ID_HEADER) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
    }

    response
}

/// Lets a repetitive log line through at most once per interval
///
/// Callers log only when [`LogThrottle::check`] returns `Some`; the value is the number
/// of occurrences suppressed since the last emitted line.
#[derive(Debug)]
pub struct LogThrottle {
    interval: Duration,
    state: Mutex<ThrottleState>,
}

#[derive(Debug)]
struct ThrottleState {
    last_emitted: Option<Instant>,
    suppressed: u64,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: Mutex::new(ThrottleState {
                last_emitted: None,
                suppressed: 0,
            }),
        }
    }

    pub fn check(&self) -> Option<u64> {
        self.check_at(Instant::now())
    }

    fn check_at(&self, now: Instant) -> Option<u64> {
        let mut state = self.state.lock();

        let due = state
            .last_emitted
            .map(|last| now.duration_since(last) >= self.interval)
            .unwrap_or(true);

        if due {
            state.last_emitted = Some(now);
            Some(std::mem::take(&mut state.suppressed))
        } else {
            state.suppressed += 1;
            None
        }
    }
}
