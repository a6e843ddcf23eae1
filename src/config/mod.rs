use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::{ProxyError, Result};
use ::config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Prefix of environment variables overriding file values, e.g. `PROXY__BACKEND__BASE_URL`
pub const ENV_PREFIX: &str = "PROXY";

/// Main proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Upstream API
    pub backend: BackendConfig,
    /// Forwarding pipeline configuration
    #[serde(default)]
    pub forwarding: ForwardingConfig,
    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiter: RateLimiterConfig,
    /// Log output configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Largest inbound body buffered for forwarding
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Add permissive CORS headers to every response
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
}

/// Upstream API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL every request path is appended to (e.g. "https://api.example.com")
    pub base_url: String,
    /// TCP connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardingConfig {
    /// Wrap the forwarding service with request logging
    #[serde(default = "default_true")]
    pub logging_enabled: bool,
    #[serde(default)]
    pub resilience: ResilienceConfig,
}

/// Time limiter and circuit breaker around the outbound call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Circuit breaker name in logs and metrics
    #[serde(default = "default_instance_name")]
    pub instance_name: String,
    /// Hard deadline for one outbound call in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

/// Quota store selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Memory,
    Redis,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Enable rate limiting
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Quota store shared by every rule
    #[serde(default)]
    pub backend: BackendKind,
    /// Redis configuration, required for the redis backend
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    /// Requests under this prefix are never rate limited
    #[serde(default = "default_management_prefix")]
    pub management_prefix: String,
    /// Retry-After hint (seconds) on rejections
    #[serde(default = "default_retry_after_secs")]
    pub retry_after_secs: u64,
    /// Requests per minute per client IP
    #[serde(default = "default_ip_per_minute")]
    pub ip_per_minute: u32,
    /// Requests per minute to `/categories`, all clients together
    #[serde(default = "default_categories_per_minute")]
    pub categories_per_minute: u32,
    /// Requests per minute to `/items` per client IP
    #[serde(default = "default_items_ip_per_minute")]
    pub items_ip_per_minute: u32,
    /// Opt-in preset rules
    #[serde(default)]
    pub extra: ExtraRulesConfig,
    /// Declarative rules evaluated after the presets
    #[serde(default)]
    pub rules: Vec<CustomRuleConfig>,
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtraRulesConfig {
    /// Per IP, path and `X-Api-Token` under `/secure`
    #[serde(default = "default_ip_path_token")]
    pub ip_path_token: OptionalRuleConfig,
    /// Per IP, path and method for POSTs under `/items`
    #[serde(default = "default_ip_path_method")]
    pub ip_path_method: OptionalRuleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionalRuleConfig {
    #[serde(default)]
    pub enabled: bool,
    pub per_minute: u32,
}

/// A rule declared entirely in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomRuleConfig {
    pub name: String,
    #[serde(default = "default_condition")]
    pub when: ConditionSpec,
    /// Key parts joined with `|`; empty means one shared quota
    #[serde(default)]
    pub key: Vec<KeyPartSpec>,
    pub capacity: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Overrides the global Retry-After hint
    #[serde(default)]
    pub retry_after_secs: Option<u64>,
}

/// Declarative condition tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionSpec {
    Always,
    MethodIs(String),
    MethodIn(Vec<String>),
    HasHeader(String),
    PathPrefix(String),
    PathGlob(String),
    All(Vec<ConditionSpec>),
    Any(Vec<ConditionSpec>),
    Not(Box<ConditionSpec>),
}

/// One component of a declarative partition key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPartSpec {
    ClientIp,
    Path,
    Method,
    Constant(String),
    Header(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_connect_timeout_ms() -> u64 {
    2_000
}

fn default_instance_name() -> String {
    "backend".to_string()
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_management_prefix() -> String {
    crate::rate_limit::DEFAULT_MANAGEMENT_PREFIX.to_string()
}

fn default_retry_after_secs() -> u64 {
    crate::rate_limit::DEFAULT_RETRY_AFTER_SECS
}

fn default_ip_per_minute() -> u32 {
    1000
}

fn default_categories_per_minute() -> u32 {
    10_000
}

fn default_items_ip_per_minute() -> u32 {
    10
}

fn default_ip_path_token() -> OptionalRuleConfig {
    OptionalRuleConfig {
        enabled: false,
        per_minute: 50,
    }
}

fn default_ip_path_method() -> OptionalRuleConfig {
    OptionalRuleConfig {
        enabled: false,
        per_minute: 20,
    }
}

fn default_condition() -> ConditionSpec {
    ConditionSpec::Always
}

fn default_window_secs() -> u64 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
            cors_enabled: true,
        }
    }
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            logging_enabled: true,
            resilience: ResilienceConfig::default(),
        }
    }
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            instance_name: default_instance_name(),
            timeout_ms: default_timeout_ms(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl ResilienceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl BackendConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: BackendKind::Memory,
            redis: None,
            management_prefix: default_management_prefix(),
            retry_after_secs: default_retry_after_secs(),
            ip_per_minute: default_ip_per_minute(),
            categories_per_minute: default_categories_per_minute(),
            items_ip_per_minute: default_items_ip_per_minute(),
            extra: ExtraRulesConfig::default(),
            rules: Vec::new(),
        }
    }
}

impl Default for ExtraRulesConfig {
    fn default() -> Self {
        Self {
            ip_path_token: default_ip_path_token(),
            ip_path_method: default_ip_path_method(),
        }
    }
}

impl ProxyConfig {
    /// Load configuration from a YAML file, overlaid by `PROXY__*` environment variables
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let settings = Config::builder()
            .add_source(File::from(path).format(FileFormat::Yaml))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| {
                ProxyError::Config(format!(
                    "Failed to read config file {}: {}",
                    path.display(),
                    e
                ))
            })?;

        settings
            .try_deserialize()
            .map_err(|e| ProxyError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| ProxyError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Create a default configuration pointing at `base_url`
    pub fn for_backend(base_url: impl Into<String>) -> Self {
        Self {
            server: ServerConfig::default(),
            backend: BackendConfig {
                base_url: base_url.into(),
                connect_timeout_ms: default_connect_timeout_ms(),
            },
            forwarding: ForwardingConfig::default(),
            rate_limiter: RateLimiterConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let base_url = url::Url::parse(&self.backend.base_url).map_err(|e| {
            ProxyError::Config(format!(
                "Invalid backend base_url '{}': {}",
                self.backend.base_url, e
            ))
        })?;
        if base_url.scheme() != "http" && base_url.scheme() != "https" {
            return Err(ProxyError::Config(format!(
                "Backend base_url must start with http:// or https://: {}",
                self.backend.base_url
            )));
        }

        if self.server.max_body_bytes == 0 {
            return Err(ProxyError::Config(
                "server.max_body_bytes must be > 0".to_string(),
            ));
        }

        let resilience = &self.forwarding.resilience;
        if resilience.timeout_ms == 0 {
            return Err(ProxyError::Config(
                "Resilience timeout_ms must be > 0".to_string(),
            ));
        }

        let breaker = &resilience.circuit_breaker;
        if !(breaker.failure_rate_threshold > 0.0 && breaker.failure_rate_threshold <= 100.0) {
            return Err(ProxyError::Config(format!(
                "failure_rate_threshold must be in (0, 100], got {}",
                breaker.failure_rate_threshold
            )));
        }
        if breaker.sliding_window_size == 0
            || breaker.minimum_number_of_calls == 0
            || breaker.permitted_calls_in_half_open_state == 0
        {
            return Err(ProxyError::Config(
                "Circuit breaker window sizes and call counts must be > 0".to_string(),
            ));
        }

        self.rate_limiter.validate()
    }
}

impl RateLimiterConfig {
    fn validate(&self) -> Result<()> {
        if self.backend == BackendKind::Redis && self.redis.is_none() {
            return Err(ProxyError::Config(
                "rate_limiter.redis.url is required for the redis backend".to_string(),
            ));
        }

        let presets = [
            ("ip_per_minute", self.ip_per_minute),
            ("categories_per_minute", self.categories_per_minute),
            ("items_ip_per_minute", self.items_ip_per_minute),
            ("extra.ip_path_token.per_minute", self.extra.ip_path_token.per_minute),
            ("extra.ip_path_method.per_minute", self.extra.ip_path_method.per_minute),
        ];
        for (field, value) in presets {
            if value == 0 {
                return Err(ProxyError::Config(format!(
                    "rate_limiter.{} must be > 0",
                    field
                )));
            }
        }

        let mut names: HashSet<&str> = ["ip", "categories", "items_ip", "ip_path_token", "ip_path_method"]
            .into_iter()
            .collect();
        for rule in &self.rules {
            if rule.capacity == 0 {
                return Err(ProxyError::Config(format!(
                    "Rate limit capacity must be > 0 for rule: {}",
                    rule.name
                )));
            }
            if rule.window_secs == 0 {
                return Err(ProxyError::Config(format!(
                    "Rate limit window must be > 0 for rule: {}",
                    rule.name
                )));
            }
            if !names.insert(rule.name.as_str()) {
                return Err(ProxyError::Config(format!(
                    "Duplicate rate limit rule name: {}",
                    rule.name
                )));
            }
        }

        Ok(())
    }
}
