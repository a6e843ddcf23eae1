use super::request::InboundRequest;
use crate::error::{ProxyError, Result};
use http::{HeaderName, Method};
use regex::Regex;
use std::ops::Not;

/// Predicate deciding whether a rule applies to a request
///
/// Conditions are pure and cheap to evaluate; composites short-circuit left to right.
#[derive(Debug, Clone)]
pub enum Condition {
    Always,
    MethodIs(Method),
    MethodIn(Vec<Method>),
    HasHeader(HeaderName),
    PathPrefix(String),
    PathGlob(PathGlob),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    pub fn always() -> Self {
        Condition::Always
    }

    pub fn method_is(method: Method) -> Self {
        Condition::MethodIs(method)
    }

    pub fn method_in<I>(methods: I) -> Self
    where
        I: IntoIterator<Item = Method>,
    {
        Condition::MethodIn(methods.into_iter().collect())
    }

    pub fn has_header(name: HeaderName) -> Self {
        Condition::HasHeader(name)
    }

    pub fn path_starts_with(prefix: impl Into<String>) -> Self {
        Condition::PathPrefix(prefix.into())
    }

    /// Match the path against a glob such as `/items/*/reviews` or `/secure/**`
    pub fn path_matches(pattern: &str) -> Result<Self> {
        Ok(Condition::PathGlob(PathGlob::new(pattern)?))
    }

    pub fn and(self, other: Condition) -> Self {
        Condition::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Condition) -> Self {
        Condition::Or(Box::new(self), Box::new(other))
    }

    pub fn negate(condition: Condition) -> Self {
        Condition::Not(Box::new(condition))
    }

    /// Evaluate against a request
    pub fn test(&self, request: &InboundRequest<'_>) -> bool {
        match self {
            Condition::Always => true,
            Condition::MethodIs(method) => request.method == method,
            Condition::MethodIn(methods) => methods.contains(request.method),
            Condition::HasHeader(name) => request.headers.contains_key(name),
            Condition::PathPrefix(prefix) => request.path.starts_with(prefix.as_str()),
            Condition::PathGlob(glob) => glob.is_match(request.path),
            Condition::And(left, right) => left.test(request) && right.test(request),
            Condition::Or(left, right) => left.test(request) || right.test(request),
            Condition::Not(inner) => !inner.test(request),
        }
    }
}

impl Not for Condition {
    type Output = Condition;

    fn not(self) -> Self::Output {
        Condition::negate(self)
    }
}

/// Compiled path glob
///
/// `*` matches within one segment, `?` matches one non-separator character and
/// `**` matches zero or more whole segments.
#[derive(Debug, Clone)]
pub struct PathGlob {
    pattern: String,
    regex: Regex,
}

impl PathGlob {
    pub fn new(pattern: &str) -> Result<Self> {
        let source = glob_to_regex(pattern);
        let regex = Regex::new(&source).map_err(|e| {
            ProxyError::Config(format!("Invalid path pattern '{}': {}", pattern, e))
        })?;

        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}

fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::from("^");

    for (index, segment) in pattern.split('/').enumerate() {
        if segment == "**" {
            if index == 0 {
                out.push_str(".*");
            } else {
                out.push_str("(?:/[^/]*)*");
            }
            continue;
        }

        if index > 0 {
            out.push('/');
        }

        for ch in segment.chars() {
            match ch {
                '*' => out.push_str("[^/]*"),
                '?' => out.push_str("[^/]"),
                other => out.push_str(&regex::escape(&other.to_string())),
            }
        }
    }

    out.push('$');
    out
}
