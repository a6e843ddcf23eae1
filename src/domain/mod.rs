//! Values passed along the forwarding pipeline.

use bytes::Bytes;
use http::{HeaderMap, Method};
use std::time::Instant;
use url::Url;
use uuid::Uuid;

/// Outbound request to the upstream API, built once rate limiting has passed
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub target_uri: Url,
    pub method: Method,
    pub headers: HeaderMap,
    /// Raw body, possibly empty
    pub body: Bytes,
}

/// Completed upstream exchange; any status code, including 4xx and 5xx
#[derive(Debug, Clone)]
pub struct ForwardResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ForwardResponse {
    pub fn new(status: u16, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }
}

/// Per-request identity and timing shared by the handler and the forwarding services
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Short id generated for every request
    pub trace_id: String,
    /// `X-Request-Id` from the client, or generated
    pub request_id: String,
    pub method: Method,
    pub target_url: String,
    pub inbound_headers: HeaderMap,
    pub started_at: Instant,
}

impl RequestContext {
    pub fn new(
        request_id: impl Into<String>,
        method: Method,
        target_url: impl Into<String>,
        inbound_headers: HeaderMap,
    ) -> Self {
        Self {
            trace_id: new_trace_id(),
            request_id: request_id.into(),
            method,
            target_url: target_url.into(),
            inbound_headers,
            started_at: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}

/// First 8 characters of a random UUID
pub fn new_trace_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}
