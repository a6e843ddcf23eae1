use crate::error::ProxyError;
use axum::{
    extract::Request,
    http::{header, uri::PathAndQuery, HeaderMap, HeaderName, HeaderValue, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};
use url::Url;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Headers forwarded to the backend; everything else is dropped
const FORWARDED_HEADERS: [HeaderName; 6] = [
    header::ACCEPT,
    header::ACCEPT_LANGUAGE,
    header::ACCEPT_CHARSET,
    header::CONTENT_TYPE,
    header::AUTHORIZATION,
    header::USER_AGENT,
];

const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Decides which headers cross the proxy in each direction
pub trait HeaderPolicy: Send + Sync {
    /// Headers for the outbound request, built from the inbound ones
    fn to_backend(&self, inbound: &HeaderMap, request_id: &str) -> HeaderMap;

    /// Headers for the client response, built from the backend's
    fn to_client(&self, backend: &HeaderMap, request_id: &str) -> HeaderMap;
}

/// Allow-list towards the backend, full copy plus security headers towards the client
#[derive(Debug, Clone, Default)]
pub struct DefaultHeaderPolicy;

impl HeaderPolicy for DefaultHeaderPolicy {
    fn to_backend(&self, inbound: &HeaderMap, request_id: &str) -> HeaderMap {
        let mut out = HeaderMap::new();

        for name in FORWARDED_HEADERS.iter() {
            for value in inbound.get_all(name) {
                out.append(name.clone(), value.clone());
            }
        }

        if !out.contains_key(header::ACCEPT) {
            out.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        }
        set_request_id(&mut out, request_id);

        debug!(
            inbound = inbound.len(),
            forwarded = out.len(),
            "Built backend request headers"
        );
        out
    }

    fn to_client(&self, backend: &HeaderMap, request_id: &str) -> HeaderMap {
        let mut out = backend.clone();
        strip_hop_by_hop(&mut out);

        out.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store, no-cache, must-revalidate"),
        );
        out.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        out.insert(header::EXPIRES, HeaderValue::from_static("0"));
        out.insert(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        );
        out.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
        out.insert(
            header::X_XSS_PROTECTION,
            HeaderValue::from_static("1; mode=block"),
        );
        set_request_id(&mut out, request_id);

        out
    }
}

/// Check if a header is hop-by-hop (only meaningful for a single connection)
pub fn is_hop_by_hop_header(name: &str) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.to_ascii_lowercase().as_str())
}

/// Remove every hop-by-hop header in place
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

/// Resolve `.` and `..` segments, plain or percent-encoded, the way the outbound URL does
///
/// Returns `None` when the input is not a valid origin-form target.
pub fn normalize_path_and_query(path_and_query: &str) -> Option<String> {
    if !path_and_query.starts_with('/') {
        return None;
    }

    let url = Url::parse(&format!("http://normalize.invalid{}", path_and_query)).ok()?;
    Some(match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    })
}

/// Rewrite the request URI to its normalized path before any rule looks at it
///
/// Rate limit conditions, partition keys and the forwarded target all read this
/// one path. Targets that cannot be normalized are rejected with 400.
pub async fn normalize_path_middleware(mut req: Request, next: Next) -> Response {
    let raw = match req.uri().path_and_query() {
        Some(pq) => pq.as_str().to_string(),
        None => return next.run(req).await,
    };

    // `OPTIONS *` and similar non-path targets pass through untouched
    if !raw.starts_with('/') {
        return next.run(req).await;
    }

    let normalized = match normalize_path_and_query(&raw) {
        Some(normalized) => normalized,
        None => {
            return ProxyError::InvalidRequest(format!("Unparsable request target: {}", raw))
                .into_response()
        }
    };

    if normalized != raw {
        let mut parts = req.uri().clone().into_parts();
        parts.path_and_query = match PathAndQuery::try_from(normalized.as_str()) {
            Ok(pq) => Some(pq),
            Err(e) => {
                return ProxyError::InvalidRequest(format!("Invalid request target: {}", e))
                    .into_response()
            }
        };
        match Uri::from_parts(parts) {
            Ok(uri) => {
                debug!(raw = %raw, normalized = %normalized, "Normalized request path");
                *req.uri_mut() = uri;
            }
            Err(e) => {
                return ProxyError::InvalidRequest(format!("Invalid request target: {}", e))
                    .into_response()
            }
        }
    }

    next.run(req).await
}

fn set_request_id(headers: &mut HeaderMap, request_id: &str) {
    match HeaderValue::from_str(request_id) {
        Ok(value) => {
            headers.insert(REQUEST_ID_HEADER, value);
        }
        Err(_) => warn!(request_id = %request_id, "Request id is not a valid header value"),
    }
}
