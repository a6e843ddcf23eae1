//! Turns `rate_limiter` configuration into the ordered rule list.

use super::backend::RateLimiterBackend;
use super::condition::Condition;
use super::key::KeyGenerator;
use super::rule::{RateLimitRule, RuleBuilder};
use super::types::Limit;
use crate::config::{ConditionSpec, CustomRuleConfig, KeyPartSpec, RateLimiterConfig};
use crate::error::{ProxyError, Result};
use http::{HeaderName, Method};
use std::sync::Arc;
use std::time::Duration;

pub const API_TOKEN_HEADER: &str = "x-api-token";

/// Build every configured rule, in evaluation order, sharing one backend
pub fn build_rules(
    config: &RateLimiterConfig,
    backend: Arc<dyn RateLimiterBackend>,
) -> Result<Vec<RateLimitRule>> {
    let retry_after = Some(config.retry_after_secs);
    let mut rules = vec![
        RuleBuilder::named("ip")
            .key(KeyGenerator::client_ip())
            .limit(Limit::per_minute(config.ip_per_minute)?)
            .retry_after(retry_after)
            .backend(backend.clone())
            .build()?,
        RuleBuilder::named("categories")
            .when(Condition::path_starts_with("/categories"))
            .key(KeyGenerator::constant("categories"))
            .limit(Limit::per_minute(config.categories_per_minute)?)
            .retry_after(retry_after)
            .backend(backend.clone())
            .build()?,
        RuleBuilder::named("items_ip")
            .when(Condition::path_starts_with("/items"))
            .key(KeyGenerator::compose([
                KeyGenerator::client_ip(),
                KeyGenerator::constant("/items"),
            ]))
            .limit(Limit::per_minute(config.items_ip_per_minute)?)
            .retry_after(retry_after)
            .backend(backend.clone())
            .build()?,
    ];

    let token = &config.extra.ip_path_token;
    if token.enabled {
        let header = HeaderName::from_static(API_TOKEN_HEADER);
        rules.push(
            RuleBuilder::named("ip_path_token")
                .when(Condition::path_starts_with("/secure"))
                .when(Condition::has_header(header.clone()))
                .key(KeyGenerator::compose([
                    KeyGenerator::client_ip(),
                    KeyGenerator::path(),
                    KeyGenerator::header(header),
                ]))
                .limit(Limit::per_minute(token.per_minute)?)
                .retry_after(retry_after)
                .backend(backend.clone())
                .build()?,
        );
    }

    let method = &config.extra.ip_path_method;
    if method.enabled {
        rules.push(
            RuleBuilder::named("ip_path_method")
                .when(Condition::path_starts_with("/items"))
                .when(Condition::method_is(Method::POST))
                .key(KeyGenerator::compose([
                    KeyGenerator::client_ip(),
                    KeyGenerator::path(),
                    KeyGenerator::method(),
                ]))
                .limit(Limit::per_minute(method.per_minute)?)
                .retry_after(retry_after)
                .backend(backend.clone())
                .build()?,
        );
    }

    for custom in &config.rules {
        rules.push(custom_rule(custom, config.retry_after_secs, backend.clone())?);
    }

    Ok(rules)
}

fn custom_rule(
    spec: &CustomRuleConfig,
    default_retry_after: u64,
    backend: Arc<dyn RateLimiterBackend>,
) -> Result<RateLimitRule> {
    let key = match spec.key.as_slice() {
        [] => KeyGenerator::constant("default"),
        [single] => key_part(single)?,
        parts => KeyGenerator::compose(parts.iter().map(key_part).collect::<Result<Vec<_>>>()?),
    };

    RuleBuilder::named(spec.name.clone())
        .when(condition(&spec.when)?)
        .key(key)
        .limit(Limit::new(spec.capacity, Duration::from_secs(spec.window_secs))?)
        .retry_after(Some(spec.retry_after_secs.unwrap_or(default_retry_after)))
        .backend(backend)
        .build()
}

fn condition(spec: &ConditionSpec) -> Result<Condition> {
    Ok(match spec {
        ConditionSpec::Always => Condition::always(),
        ConditionSpec::MethodIs(method) => Condition::method_is(parse_method(method)?),
        ConditionSpec::MethodIn(methods) => Condition::method_in(
            methods
                .iter()
                .map(|m| parse_method(m))
                .collect::<Result<Vec<_>>>()?,
        ),
        ConditionSpec::HasHeader(name) => Condition::has_header(parse_header(name)?),
        ConditionSpec::PathPrefix(prefix) => Condition::path_starts_with(prefix.clone()),
        ConditionSpec::PathGlob(pattern) => Condition::path_matches(pattern)?,
        ConditionSpec::All(specs) => fold(specs, Condition::and)?,
        ConditionSpec::Any(specs) => fold(specs, Condition::or)?,
        ConditionSpec::Not(inner) => !condition(inner)?,
    })
}

fn fold(
    specs: &[ConditionSpec],
    combine: fn(Condition, Condition) -> Condition,
) -> Result<Condition> {
    let mut conditions = specs.iter().map(condition);
    let first = conditions
        .next()
        .ok_or_else(|| ProxyError::Config("Condition list must not be empty".to_string()))??;

    conditions.try_fold(first, |acc, next| -> Result<Condition> {
        Ok(combine(acc, next?))
    })
}

fn key_part(spec: &KeyPartSpec) -> Result<KeyGenerator> {
    Ok(match spec {
        KeyPartSpec::ClientIp => KeyGenerator::client_ip(),
        KeyPartSpec::Path => KeyGenerator::path(),
        KeyPartSpec::Method => KeyGenerator::method(),
        KeyPartSpec::Constant(value) => KeyGenerator::constant(value.clone()),
        KeyPartSpec::Header(name) => KeyGenerator::header(parse_header(name)?),
    })
}

fn parse_method(method: &str) -> Result<Method> {
    Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| ProxyError::Config(format!("Invalid HTTP method '{}'", method)))
}

fn parse_header(name: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| ProxyError::Config(format!("Invalid header name '{}'", name)))
}
