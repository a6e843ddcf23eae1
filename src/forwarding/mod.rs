//! Forwarding pipeline: outbound call, response header policy, outcome logging.

use crate::domain::{ForwardRequest, ForwardResponse, RequestContext};
use crate::error::Result;
use crate::http_client::HttpClientGateway;
use crate::transform::HeaderPolicy;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

#[async_trait]
pub trait ForwardingService: Send + Sync {
    async fn forward(&self, request: ForwardRequest, ctx: &RequestContext)
        -> Result<ForwardResponse>;
}

/// Calls the gateway and rewrites backend headers for the client
pub struct DefaultForwardingService {
    gateway: Arc<dyn HttpClientGateway>,
    header_policy: Arc<dyn HeaderPolicy>,
}

impl DefaultForwardingService {
    pub fn new(gateway: Arc<dyn HttpClientGateway>, header_policy: Arc<dyn HeaderPolicy>) -> Self {
        Self {
            gateway,
            header_policy,
        }
    }
}

#[async_trait]
impl ForwardingService for DefaultForwardingService {
    async fn forward(
        &self,
        request: ForwardRequest,
        ctx: &RequestContext,
    ) -> Result<ForwardResponse> {
        let start = Instant::now();
        let response = self.gateway.exchange(request).await?;

        let headers = self
            .header_policy
            .to_client(&response.headers, &ctx.request_id);
        let latency_ms = start.elapsed().as_millis() as u64;
        let bytes = response.body.len();
        let status = response.status;

        if status >= 500 {
            error!(trace_id = %ctx.trace_id, request_id = %ctx.request_id, status, bytes, latency_ms, "Backend responded");
        } else if status >= 400 {
            warn!(trace_id = %ctx.trace_id, request_id = %ctx.request_id, status, bytes, latency_ms, "Backend responded");
        } else {
            info!(trace_id = %ctx.trace_id, request_id = %ctx.request_id, status, bytes, latency_ms, "Backend responded");
        }

        Ok(ForwardResponse::new(status, headers, response.body))
    }
}

/// Logs the target of every forwarded request, then delegates
pub struct LoggingForwardingService {
    delegate: Arc<dyn ForwardingService>,
}

impl LoggingForwardingService {
    pub fn new(delegate: Arc<dyn ForwardingService>) -> Self {
        Self { delegate }
    }
}

#[async_trait]
impl ForwardingService for LoggingForwardingService {
    async fn forward(
        &self,
        request: ForwardRequest,
        ctx: &RequestContext,
    ) -> Result<ForwardResponse> {
        info!(
            trace_id = %ctx.trace_id,
            request_id = %ctx.request_id,
            target = %ctx.target_url,
            "Forwarding request"
        );
        self.delegate.forward(request, ctx).await
    }
}
