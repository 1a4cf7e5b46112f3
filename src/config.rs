//! Configuration management for Turnstile.
//!
//! Settings are layered: built-in defaults, then an optional YAML file, then
//! `TURNSTILE__`-prefixed environment variables (`TURNSTILE__SERVER__HTTP_ADDR`,
//! `TURNSTILE__RATE_LIMITING__STORE`, ...).

use std::net::SocketAddr;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TurnstileError};
use crate::ratelimit::cleanup::DEFAULT_CLEANUP_INTERVAL;
use crate::ratelimit::rules::{RateLimitConfig, PRODUCTION_ENVIRONMENT};
use crate::ratelimit::store::{StoreKind, DEFAULT_MAX_ENTRIES};

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Path to the policy table; the built-in table is used when unset
    #[serde(default)]
    pub policy_path: Option<String>,

    /// Deployment environment name, selecting the policy multiplier
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Store variant
    #[serde(default)]
    pub store: StoreKind,

    /// Maximum records held per store
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Seconds between background cleanup sweeps
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Honour proxy headers only from RFC1918 peers
    #[serde(default)]
    pub trusted_proxies_only: bool,

    /// Two-window mode; replaces per-endpoint policies when set
    #[serde(default)]
    pub burst: Option<BurstConfig>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            policy_path: None,
            environment: default_environment(),
            store: StoreKind::default(),
            max_entries: default_max_entries(),
            cleanup_interval_secs: default_cleanup_interval(),
            trusted_proxies_only: false,
            burst: None,
        }
    }
}

/// Windows for burst protection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurstConfig {
    /// Short window
    pub burst: RateLimitConfig,
    /// Long window
    pub sustained: RateLimitConfig,
}

fn default_environment() -> String {
    PRODUCTION_ENVIRONMENT.to_string()
}

fn default_max_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}

fn default_cleanup_interval() -> u64 {
    DEFAULT_CLEANUP_INTERVAL.as_secs()
}

impl TurnstileConfig {
    /// Load layered settings: defaults, optional file, then environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::new(path, FileFormat::Yaml).required(true));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix("TURNSTILE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Parse settings from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| TurnstileError::Configuration(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TurnstileConfig::default();
        assert_eq!(config.server.http_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.rate_limiting.environment, "production");
        assert_eq!(config.rate_limiting.store, StoreKind::Expiring);
        assert_eq!(config.rate_limiting.max_entries, 10_000);
        assert_eq!(config.rate_limiting.cleanup_interval_secs, 60);
        assert!(config.rate_limiting.burst.is_none());
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
server:
  http_addr: 0.0.0.0:9000
rate_limiting:
  environment: development
  store: lru
  max_entries: 500
  burst:
    burst:
      requests: 2
      window: 1000
    sustained:
      requests: 10
      window: 60000
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.http_addr.port(), 9000);
        assert_eq!(config.rate_limiting.environment, "development");
        assert_eq!(config.rate_limiting.store, StoreKind::Lru);
        assert_eq!(config.rate_limiting.max_entries, 500);
        assert_eq!(config.rate_limiting.cleanup_interval_secs, 60);

        let burst = config.rate_limiting.burst.unwrap();
        assert_eq!(burst.burst, RateLimitConfig::new(2, 1_000));
        assert_eq!(burst.sustained.requests, 10);
    }

    #[test]
    fn test_from_yaml_rejects_unknown_store() {
        let yaml = "rate_limiting:\n  store: redis\n";
        assert!(matches!(
            TurnstileConfig::from_yaml(yaml),
            Err(TurnstileError::Configuration(_))
        ));
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = TurnstileConfig::load(None).unwrap();
        assert_eq!(config.rate_limiting.max_entries, DEFAULT_MAX_ENTRIES);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = TurnstileConfig::load(Some("/nonexistent/turnstile.yaml"));
        assert!(matches!(result, Err(TurnstileError::Settings(_))));
    }
}
