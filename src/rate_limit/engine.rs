use super::request::InboundRequest;
use super::rule::RateLimitRule;
use super::types::Decision;
use crate::error::Result;
use http::Method;
use tracing::debug;

pub const DEFAULT_MANAGEMENT_PREFIX: &str = "/actuator";

/// Ordered rule list evaluated per request; the first blocking rule wins
#[derive(Debug)]
pub struct RateLimitEngine {
    rules: Vec<RateLimitRule>,
    management_prefix: String,
}

impl RateLimitEngine {
    pub fn new(rules: Vec<RateLimitRule>) -> Self {
        Self::with_management_prefix(rules, DEFAULT_MANAGEMENT_PREFIX)
    }

    pub fn with_management_prefix(
        rules: Vec<RateLimitRule>,
        management_prefix: impl Into<String>,
    ) -> Self {
        Self {
            rules,
            management_prefix: management_prefix.into(),
        }
    }

    /// Engine with no rules: every request is allowed
    pub fn disabled() -> Self {
        Self::new(Vec::new())
    }

    pub fn rules(&self) -> &[RateLimitRule] {
        &self.rules
    }

    /// Preflight and management traffic is never rate limited
    pub fn should_bypass(&self, request: &InboundRequest<'_>) -> bool {
        request.method == Method::OPTIONS
            || (!self.management_prefix.is_empty()
                && request.path.starts_with(self.management_prefix.as_str()))
    }

    /// Evaluate rules in order, stopping at the first block
    pub async fn evaluate(&self, request: &InboundRequest<'_>) -> Result<Decision> {
        if self.should_bypass(request) {
            return Ok(Decision::allow());
        }

        for rule in &self.rules {
            let decision = rule.evaluate(request).await?;
            if !decision.is_allowed() {
                debug!(rule = %rule.name(), path = %request.path, "Rate limit rule blocked request");
                return Ok(decision);
            }
        }

        Ok(Decision::allow())
    }
}
