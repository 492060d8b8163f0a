//! Agent-host configuration loading.
//!
//! TOML is the sole config source; no environment variable overrides.
//! Default config path: `/etc/agent-fabric/config.toml`.
//!
//! # Required fields
//! - `schema_version = 1`
//! - `agent.name`
//! - `agent.endpoint`

use serde::Deserialize;
use std::path::Path;
use tracing::debug;

// ---------------------------------------------------------------------------
// Config types (deserialized from TOML)
// ---------------------------------------------------------------------------

/// Top-level agent-host configuration.
#[derive(Debug, Clone)]
pub struct AgentHostConfig {
    pub schema_version: u32,
    pub agent: AgentConfig,
    pub registry: RegistryConfig,
    pub rate_limiter: Option<RateLimiterSettings>,
    pub circuit_breaker: Option<CircuitBreakerSettings>,
    pub cache: Option<CacheSettings>,
    pub retry: Option<RetrySettings>,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub name: String,
    pub endpoint: String,
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub heartbeat_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct RateLimiterSettings {
    pub rate: f64,
    pub capacity: f64,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub recovery_timeout_secs: u64,
    pub call_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub max_size: usize,
    pub default_ttl_secs: u64,
}

#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    schema_version: Option<u32>,
    agent: Option<RawAgentConfig>,
    registry: Option<RawRegistryConfig>,
    middleware: Option<RawMiddlewareConfig>,
}

#[derive(Debug, Deserialize)]
struct RawAgentConfig {
    name: Option<String>,
    endpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRegistryConfig {
    heartbeat_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawMiddlewareConfig {
    rate_limiter: Option<RawRateLimiter>,
    circuit_breaker: Option<RawCircuitBreaker>,
    cache: Option<RawCache>,
    retry: Option<RawRetry>,
}

#[derive(Debug, Deserialize)]
struct RawRateLimiter {
    enabled: Option<bool>,
    rate: Option<f64>,
    capacity: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawCircuitBreaker {
    enabled: Option<bool>,
    failure_threshold: Option<u32>,
    success_threshold: Option<u32>,
    recovery_timeout_secs: Option<u64>,
    call_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawCache {
    enabled: Option<bool>,
    max_size: Option<usize>,
    default_ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawRetry {
    enabled: Option<bool>,
    max_attempts: Option<u32>,
    initial_backoff_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load agent-host config from a custom path.
pub fn load_config_from_path(path: &Path) -> Result<AgentHostConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

/// Load agent-host config from the default path `/etc/agent-fabric/config.toml`.
pub fn load_config() -> Result<AgentHostConfig, ConfigError> {
    load_config_from_path(Path::new("/etc/agent-fabric/config.toml"))
}

/// Load agent-host config from a TOML string.
pub fn load_config_from_str(toml_str: &str) -> Result<AgentHostConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let schema_version = raw
        .schema_version
        .ok_or_else(|| ConfigError::MissingField("schema_version".to_owned()))?;
    if schema_version != 1 {
        return Err(ConfigError::InvalidValue(format!(
            "schema_version must be 1, got {schema_version}"
        )));
    }

    let raw_agent = raw
        .agent
        .ok_or_else(|| ConfigError::MissingField("agent".to_owned()))?;
    let name = raw_agent
        .name
        .ok_or_else(|| ConfigError::MissingField("agent.name".to_owned()))?;
    if name.trim().is_empty() {
        return Err(ConfigError::InvalidValue("agent.name must not be empty".to_owned()));
    }
    let endpoint = raw_agent
        .endpoint
        .ok_or_else(|| ConfigError::MissingField("agent.endpoint".to_owned()))?;

    let registry = match raw.registry {
        Some(r) => RegistryConfig {
            heartbeat_timeout_secs: r.heartbeat_timeout_secs.unwrap_or(90),
        },
        None => RegistryConfig {
            heartbeat_timeout_secs: 90,
        },
    };

    let middleware = raw.middleware.unwrap_or(RawMiddlewareConfig {
        rate_limiter: None,
        circuit_breaker: None,
        cache: None,
        retry: None,
    });

    let rate_limiter = middleware
        .rate_limiter
        .filter(|r| r.enabled.unwrap_or(false))
        .map(|r| RateLimiterSettings {
            rate: r.rate.unwrap_or(10.0),
            capacity: r.capacity.unwrap_or(20.0),
        });

    let circuit_breaker = middleware
        .circuit_breaker
        .filter(|c| c.enabled.unwrap_or(false))
        .map(|c| CircuitBreakerSettings {
            failure_threshold: c.failure_threshold.unwrap_or(5),
            success_threshold: c.success_threshold.unwrap_or(2),
            recovery_timeout_secs: c.recovery_timeout_secs.unwrap_or(30),
            call_timeout_secs: c.call_timeout_secs.unwrap_or(10),
        });

    let cache = middleware
        .cache
        .filter(|c| c.enabled.unwrap_or(false))
        .map(|c| CacheSettings {
            max_size: c.max_size.unwrap_or(1000),
            default_ttl_secs: c.default_ttl_secs.unwrap_or(60),
        });

    let retry = middleware
        .retry
        .filter(|r| r.enabled.unwrap_or(false))
        .map(|r| RetrySettings {
            max_attempts: r.max_attempts.unwrap_or(3),
            initial_backoff_ms: r.initial_backoff_ms.unwrap_or(100),
        });

    debug!(agent = %name, endpoint = %endpoint, "agent-host config loaded");

    Ok(AgentHostConfig {
        schema_version,
        agent: AgentConfig { name, endpoint },
        registry,
        rate_limiter,
        circuit_breaker,
        cache,
        retry,
    })
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    MissingField(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {s}"),
            ConfigError::Parse(s) => write!(f, "parse error: {s}"),
            ConfigError::MissingField(s) => write!(f, "missing required field: {s}"),
            ConfigError::InvalidValue(s) => write!(f, "invalid config value: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_a_minimal_config_with_defaults() {
        let config = load_config_from_str(
            r#"
            schema_version = 1

            [agent]
            name = "summarizer"
            endpoint = "tcp://0.0.0.0:9000"
            "#,
        )
        .unwrap();

        assert_eq!(config.agent.name, "summarizer");
        assert_eq!(config.registry.heartbeat_timeout_secs, 90);
        assert!(config.circuit_breaker.is_none());
    }

    #[test]
    fn disabled_middleware_tables_are_not_built() {
        let config = load_config_from_str(
            r#"
            schema_version = 1

            [agent]
            name = "summarizer"
            endpoint = "tcp://0.0.0.0:9000"

            [middleware.circuit_breaker]
            enabled = false
            failure_threshold = 2
            "#,
        )
        .unwrap();

        assert!(config.circuit_breaker.is_none());
    }

    #[test]
    fn enabled_middleware_tables_fill_in_defaults() {
        let config = load_config_from_str(
            r#"
            schema_version = 1

            [agent]
            name = "summarizer"
            endpoint = "tcp://0.0.0.0:9000"

            [middleware.cache]
            enabled = true
            max_size = 500
            "#,
        )
        .unwrap();

        let cache = config.cache.unwrap();
        assert_eq!(cache.max_size, 500);
        assert_eq!(cache.default_ttl_secs, 60);
    }

    #[test]
    fn rejects_unsupported_schema_version() {
        let err = load_config_from_str("schema_version = 2\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn rejects_missing_agent_table() {
        let err = load_config_from_str("schema_version = 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(_)));
    }

    #[test]
    fn rejects_empty_agent_name() {
        let err = load_config_from_str(
            r#"
            schema_version = 1

            [agent]
            name = ""
            endpoint = "tcp://0.0.0.0:9000"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }
}
