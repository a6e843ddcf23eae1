use super::backend::RateLimiterBackend;
use super::condition::Condition;
use super::key::KeyGenerator;
use super::request::InboundRequest;
use super::types::{Decision, Limit, DEFAULT_RETRY_AFTER_SECS};
use crate::error::{ProxyError, Result};
use std::fmt;
use std::sync::Arc;

/// One named quota: applies `limit` per derived key to requests matching `condition`
#[derive(Clone)]
pub struct RateLimitRule {
    name: String,
    condition: Condition,
    key: KeyGenerator,
    limit: Limit,
    backend: Arc<dyn RateLimiterBackend>,
    retry_after: Option<u64>,
}

impl RateLimitRule {
    pub fn builder(name: impl Into<String>) -> RuleBuilder {
        RuleBuilder::named(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn limit(&self) -> &Limit {
        &self.limit
    }

    /// Evaluate the rule; a non-matching request never touches the backend
    pub async fn evaluate(&self, request: &InboundRequest<'_>) -> Result<Decision> {
        if !self.condition.test(request) {
            return Ok(Decision::allow());
        }

        let key = format!("{}:{}", self.name, self.key.key(request));
        if self.backend.try_consume(&key, 1, &self.limit).await? {
            Ok(Decision::allow())
        } else {
            Ok(Decision::block(self.name.clone(), self.retry_after))
        }
    }
}

impl fmt::Debug for RateLimitRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitRule")
            .field("name", &self.name)
            .field("condition", &self.condition)
            .field("key", &self.key)
            .field("limit", &self.limit)
            .field("backend", &self.backend.name())
            .field("retry_after", &self.retry_after)
            .finish()
    }
}

/// Fluent builder for [`RateLimitRule`]
pub struct RuleBuilder {
    name: String,
    condition: Condition,
    key: KeyGenerator,
    limit: Option<Limit>,
    backend: Option<Arc<dyn RateLimiterBackend>>,
    retry_after: Option<u64>,
}

impl RuleBuilder {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            condition: Condition::always(),
            key: KeyGenerator::constant("default"),
            limit: None,
            backend: None,
            retry_after: Some(DEFAULT_RETRY_AFTER_SECS),
        }
    }

    /// Add a condition; repeated calls are ANDed together
    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = match self.condition {
            Condition::Always => condition,
            existing => existing.and(condition),
        };
        self
    }

    pub fn key(mut self, key: KeyGenerator) -> Self {
        self.key = key;
        self
    }

    pub fn limit(mut self, limit: Limit) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn RateLimiterBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Retry-After hint sent on rejection; `None` omits the header
    pub fn retry_after(mut self, seconds: Option<u64>) -> Self {
        self.retry_after = seconds;
        self
    }

    pub fn build(self) -> Result<RateLimitRule> {
        if self.name.trim().is_empty() {
            return Err(ProxyError::Config("Rule name must not be empty".to_string()));
        }

        let backend = self.backend.ok_or_else(|| {
            ProxyError::Config(format!("Rule '{}' has no backend", self.name))
        })?;

        let limit = match self.limit {
            Some(limit) => limit,
            None => Limit::per_minute(60)?,
        };

        Ok(RateLimitRule {
            name: self.name,
            condition: self.condition,
            key: self.key,
            limit,
            backend,
            retry_after: self.retry_after,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::local::LocalRateLimiter;
    use async_trait::async_trait;
    use http::{HeaderMap, Method};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls, always grants
    #[derive(Default)]
    struct CountingBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RateLimiterBackend for CountingBackend {
        async fn try_consume(&self, _key: &str, _permits: u32, _limit: &Limit) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    #[test]
    fn test_build_requires_backend() {
        let result = RuleBuilder::named("orphan").build();
        assert!(matches!(result, Err(ProxyError::Config(_))));
    }

    #[test]
    fn test_build_defaults() {
        let rule = RuleBuilder::named("defaults")
            .backend(Arc::new(LocalRateLimiter::new()))
            .build()
            .unwrap();

        assert_eq!(rule.name(), "defaults");
        assert_eq!(rule.limit().capacity(), 60);
        assert_eq!(rule.limit().window().as_secs(), 60);
        assert_eq!(rule.key, KeyGenerator::constant("default"));
        assert!(matches!(rule.condition, Condition::Always));
    }

    #[tokio::test]
    async fn test_capacity_one_per_minute_blocks_second_request() {
        let rule = RuleBuilder::named("single")
            .limit(Limit::per_minute(1).unwrap())
            .backend(Arc::new(LocalRateLimiter::new()))
            .build()
            .unwrap();

        let headers = HeaderMap::new();
        let request = InboundRequest::new(&Method::GET, "/items", &headers, None);

        assert_eq!(rule.evaluate(&request).await.unwrap(), Decision::allow());
        assert_eq!(
            rule.evaluate(&request).await.unwrap(),
            Decision::block("single", Some(60))
        );
    }

    #[tokio::test]
    async fn test_non_matching_condition_skips_backend() {
        let backend = Arc::new(CountingBackend::default());
        let rule = RuleBuilder::named("items")
            .when(Condition::path_starts_with("/items"))
            .backend(backend.clone())
            .build()
            .unwrap();

        let headers = HeaderMap::new();
        let request = InboundRequest::new(&Method::GET, "/categories", &headers, None);

        assert!(rule.evaluate(&request).await.unwrap().is_allowed());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);

        let request = InboundRequest::new(&Method::GET, "/items/7", &headers, None);
        assert!(rule.evaluate(&request).await.unwrap().is_allowed());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_when_ands_conditions() {
        let rule = RuleBuilder::named("post_items")
            .when(Condition::path_starts_with("/items"))
            .when(Condition::method_is(Method::POST))
            .limit(Limit::per_minute(1).unwrap())
            .backend(Arc::new(LocalRateLimiter::new()))
            .build()
            .unwrap();

        let headers = HeaderMap::new();
        let get = InboundRequest::new(&Method::GET, "/items", &headers, None);
        let post = InboundRequest::new(&Method::POST, "/items", &headers, None);

        for _ in 0..3 {
            assert!(rule.evaluate(&get).await.unwrap().is_allowed());
        }
        assert!(rule.evaluate(&post).await.unwrap().is_allowed());
        assert!(!rule.evaluate(&post).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_rules_sharing_a_backend_use_separate_namespaces() {
        let backend: Arc<dyn RateLimiterBackend> = Arc::new(LocalRateLimiter::new());
        let first = RuleBuilder::named("a")
            .limit(Limit::per_minute(1).unwrap())
            .backend(backend.clone())
            .build()
            .unwrap();
        let second = RuleBuilder::named("b")
            .limit(Limit::per_minute(1).unwrap())
            .backend(backend)
            .build()
            .unwrap();

        let headers = HeaderMap::new();
        let request = InboundRequest::new(&Method::GET, "/", &headers, None);

        assert!(first.evaluate(&request).await.unwrap().is_allowed());
        assert!(second.evaluate(&request).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_custom_retry_after() {
        let rule = RuleBuilder::named("quiet")
            .limit(Limit::per_minute(1).unwrap())
            .retry_after(None)
            .backend(Arc::new(LocalRateLimiter::new()))
            .build()
            .unwrap();

        let headers = HeaderMap::new();
        let request = InboundRequest::new(&Method::GET, "/", &headers, None);
        rule.evaluate(&request).await.unwrap();

        assert_eq!(rule.evaluate(&request).await.unwrap().retry_after(), None);
    }
}
