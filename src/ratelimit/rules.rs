//! Endpoint policy configuration and matching.
//!
//! A policy table maps path patterns to either a single rate limit or a
//! per-method set of limits, with a `default` fallback. Patterns are plain
//! paths or paths with bracketed parameter segments (`/items/[id]`). The
//! table is ordered and the first matching pattern wins.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, TurnstileError};

/// Request cap used when rate limiting is disabled for the environment.
pub const UNLIMITED: u64 = u64::MAX;

/// Reserved pattern name addressing the fallback policy.
pub const DEFAULT_PATTERN: &str = "default";

/// Environment used when the configured name has no entry in the table.
pub const PRODUCTION_ENVIRONMENT: &str = "production";

const MINUTE_MS: u64 = 60_000;
const HOUR_MS: u64 = 60 * MINUTE_MS;

/// Rate limit policy for one endpoint (or one method of an endpoint).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum requests per window
    pub requests: u64,
    /// Window length in milliseconds
    pub window: u64,
    /// Tighter short-term cap
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst_limit: Option<u64>,
    /// Accepted for compatibility with existing policy files; not consulted
    /// when counting.
    #[serde(default)]
    pub skip_successful_requests: bool,
    /// Human-readable text returned when a request is denied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RateLimitConfig {
    /// Create a config allowing `requests` per `window_ms`.
    pub fn new(requests: u64, window_ms: u64) -> Self {
        Self {
            requests,
            window: window_ms,
            burst_limit: None,
            skip_successful_requests: false,
            message: None,
        }
    }

    /// Set the burst limit.
    pub fn with_burst_limit(mut self, burst_limit: u64) -> Self {
        self.burst_limit = Some(burst_limit);
        self
    }

    /// Set the deny message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Whether this config effectively disables limiting.
    pub fn is_unlimited(&self) -> bool {
        self.requests == UNLIMITED
    }
}

/// Check that a config has a usable shape.
pub fn validate_config(config: &RateLimitConfig) -> Result<()> {
    if config.requests == 0 {
        return Err(TurnstileError::Configuration(
            "requests must be a positive integer".to_string(),
        ));
    }
    if config.window == 0 {
        return Err(TurnstileError::Configuration(
            "window must be a positive number of milliseconds".to_string(),
        ));
    }
    if config.burst_limit == Some(0) {
        return Err(TurnstileError::Configuration(
            "burst_limit must be positive when set".to_string(),
        ));
    }
    Ok(())
}

/// Prefix a configuration error message with where it was found.
fn with_context(error: TurnstileError, context: &str) -> TurnstileError {
    match error {
        TurnstileError::Configuration(msg) => {
            TurnstileError::Configuration(format!("{}: {}", context, msg))
        }
        other => other,
    }
}

/// The policy attached to a pattern: one config for every method, or one
/// config per HTTP method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EndpointPolicy {
    /// Applies to every method
    Flat(RateLimitConfig),
    /// Keyed by upper-case method name
    PerMethod(BTreeMap<String, RateLimitConfig>),
}

impl EndpointPolicy {
    /// The config for `method`, if this policy covers it.
    pub fn for_method(&self, method: &str) -> Option<&RateLimitConfig> {
        match self {
            EndpointPolicy::Flat(config) => Some(config),
            EndpointPolicy::PerMethod(by_method) => by_method.get(method).or_else(|| {
                by_method
                    .iter()
                    .find(|(m, _)| m.eq_ignore_ascii_case(method))
                    .map(|(_, config)| config)
            }),
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            EndpointPolicy::Flat(config) => validate_config(config),
            EndpointPolicy::PerMethod(by_method) => {
                for (method, config) in by_method {
                    validate_config(config).map_err(|e| with_context(e, method))?;
                }
                Ok(())
            }
        }
    }
}

impl From<RateLimitConfig> for EndpointPolicy {
    fn from(config: RateLimitConfig) -> Self {
        EndpointPolicy::Flat(config)
    }
}

/// A path pattern, with bracketed segments compiled to a regex.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct EndpointPattern {
    raw: String,
    regex: Option<Regex>,
}

impl EndpointPattern {
    /// Compile a pattern. Each `[...]` token matches one path segment.
    pub fn new(pattern: impl Into<String>) -> Self {
        let raw = pattern.into();
        let regex = compile_pattern(&raw);
        Self { raw, regex }
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Exact equality first, then the compiled parameter regex.
    pub fn matches(&self, path: &str) -> bool {
        self.matches_exact(path) || self.matches_params(path)
    }

    /// Whether `path` is this pattern verbatim.
    pub fn matches_exact(&self, path: &str) -> bool {
        path == self.raw
    }

    /// Whether `path` matches through `[param]` segments.
    pub fn matches_params(&self, path: &str) -> bool {
        self.regex.as_ref().is_some_and(|re| re.is_match(path))
    }
}

impl PartialEq for EndpointPattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for EndpointPattern {}

impl From<String> for EndpointPattern {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<EndpointPattern> for String {
    fn from(pattern: EndpointPattern) -> Self {
        pattern.raw
    }
}

fn compile_pattern(pattern: &str) -> Option<Regex> {
    if !pattern.contains('[') {
        return None;
    }

    let mut source = String::from("^");
    let mut rest = pattern;

    while let Some(open) = rest.find('[') {
        let Some(close) = rest[open..].find(']') else {
            break;
        };
        source.push_str(&regex::escape(&rest[..open]));
        source.push_str("([^/]+)");
        rest = &rest[open + close + 1..];
    }
    source.push_str(&regex::escape(rest));
    source.push('$');

    Regex::new(&source).ok()
}

/// Whether `path` matches `pattern` (exactly, or through `[param]` segments).
pub fn match_endpoint_pattern(path: &str, pattern: &str) -> bool {
    EndpointPattern::new(pattern).matches(path)
}

/// One row of the policy table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRule {
    /// Path pattern
    pub pattern: EndpointPattern,
    /// Policy applied when the pattern matches
    pub policy: EndpointPolicy,
}

impl EndpointRule {
    /// Create a rule.
    pub fn new(pattern: &str, policy: impl Into<EndpointPolicy>) -> Self {
        Self {
            pattern: EndpointPattern::new(pattern),
            policy: policy.into(),
        }
    }
}

/// Per-environment adjustment applied after policy matching.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSettings {
    /// Factor applied to `requests` (result floored)
    pub multiplier: f64,
    /// When false, every resolved config is unlimited
    pub enabled: bool,
}

impl Default for EnvironmentSettings {
    fn default() -> Self {
        Self {
            multiplier: 1.0,
            enabled: true,
        }
    }
}

impl EnvironmentSettings {
    /// Apply this environment to a matched config.
    pub fn apply(&self, mut config: RateLimitConfig) -> RateLimitConfig {
        if !self.enabled {
            config.requests = UNLIMITED;
        } else if self.multiplier != 1.0 {
            config.requests = (config.requests as f64 * self.multiplier).floor() as u64;
        }
        config
    }
}

/// The complete, ordered policy table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyTable {
    /// Fallback policy
    pub default: RateLimitConfig,
    /// Ordered rules; the first matching pattern wins
    #[serde(default)]
    pub endpoints: Vec<EndpointRule>,
    /// Environment name to adjustment
    #[serde(default = "default_environments")]
    pub environments: HashMap<String, EnvironmentSettings>,
}

fn default_environments() -> HashMap<String, EnvironmentSettings> {
    HashMap::from([
        (
            "development".to_string(),
            EnvironmentSettings {
                multiplier: 10.0,
                enabled: true,
            },
        ),
        (
            "test".to_string(),
            EnvironmentSettings {
                multiplier: 1.0,
                enabled: false,
            },
        ),
        (
            PRODUCTION_ENVIRONMENT.to_string(),
            EnvironmentSettings::default(),
        ),
    ])
}

impl Default for PolicyTable {
    fn default() -> Self {
        let endpoints = vec![
            EndpointRule::new(
                "/api/auth/login",
                RateLimitConfig::new(5, 15 * MINUTE_MS)
                    .with_message("Too many login attempts, please try again later"),
            ),
            EndpointRule::new(
                "/api/auth/register",
                RateLimitConfig::new(3, HOUR_MS)
                    .with_message("Too many registration attempts, please try again later"),
            ),
            EndpointRule::new(
                "/api/auth/reset-password",
                RateLimitConfig::new(3, HOUR_MS),
            ),
            EndpointRule::new(
                "/api/items",
                EndpointPolicy::PerMethod(BTreeMap::from([
                    ("GET".to_string(), RateLimitConfig::new(100, MINUTE_MS)),
                    (
                        "POST".to_string(),
                        RateLimitConfig::new(20, MINUTE_MS).with_burst_limit(5),
                    ),
                ])),
            ),
            EndpointRule::new(
                "/api/items/[id]",
                EndpointPolicy::PerMethod(BTreeMap::from([
                    ("GET".to_string(), RateLimitConfig::new(100, MINUTE_MS)),
                    ("PUT".to_string(), RateLimitConfig::new(30, MINUTE_MS)),
                    ("DELETE".to_string(), RateLimitConfig::new(10, MINUTE_MS)),
                ])),
            ),
            EndpointRule::new("/api/search", RateLimitConfig::new(30, MINUTE_MS)),
            EndpointRule::new(
                "/api/upload",
                RateLimitConfig::new(10, MINUTE_MS)
                    .with_burst_limit(3)
                    .with_message("Upload limit reached, please wait before uploading again"),
            ),
        ];

        Self {
            default: RateLimitConfig::new(100, MINUTE_MS),
            endpoints,
            environments: default_environments(),
        }
    }
}

impl PolicyTable {
    /// Load a policy table from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit policy table");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate a policy table from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let table: PolicyTable = serde_yaml::from_str(yaml).map_err(|e| {
            TurnstileError::Configuration(format!("Failed to parse policy table: {}", e))
        })?;
        table.validate()?;
        Ok(table)
    }

    /// Validate every config in the table.
    pub fn validate(&self) -> Result<()> {
        validate_config(&self.default).map_err(|e| with_context(e, DEFAULT_PATTERN))?;

        for rule in &self.endpoints {
            rule.policy
                .validate()
                .map_err(|e| with_context(e, rule.pattern.as_str()))?;
        }
        Ok(())
    }

    /// The config for a request before any environment adjustment.
    ///
    /// An entry equal to `path` wins over any `[param]` pattern; otherwise
    /// the first parameter pattern in table order decides. A per-method
    /// policy with no entry for `method` falls through to the default.
    pub fn find(&self, path: &str, method: &str) -> &RateLimitConfig {
        self.endpoints
            .iter()
            .find(|rule| rule.pattern.matches_exact(path))
            .or_else(|| {
                self.endpoints
                    .iter()
                    .find(|rule| rule.pattern.matches_params(path))
            })
            .and_then(|rule| rule.policy.for_method(method))
            .unwrap_or(&self.default)
    }

    /// Settings for the named environment, falling back to production.
    pub fn environment(&self, name: &str) -> EnvironmentSettings {
        self.environments
            .get(name)
            .or_else(|| self.environments.get(PRODUCTION_ENVIRONMENT))
            .copied()
            .unwrap_or_default()
    }
}

fn rejected_protected(pattern: &str) -> TurnstileError {
    warn!(pattern = %pattern, "Rejected override of protected policy table");
    TurnstileError::Configuration("policy table is protected against modification".to_string())
}

/// Resolves the effective config for a request path and method.
///
/// The table can be changed at runtime through
/// [`override_config`](PolicyResolver::override_config) until
/// [`protect`](PolicyResolver::protect) freezes it.
pub struct PolicyResolver {
    table: RwLock<PolicyTable>,
    environment: String,
    settings: EnvironmentSettings,
    protected: AtomicBool,
}

impl PolicyResolver {
    /// Create a resolver over `table` for the named environment.
    pub fn new(table: PolicyTable, environment: &str) -> Self {
        let settings = table.environment(environment);

        info!(
            environment = %environment,
            multiplier = settings.multiplier,
            enabled = settings.enabled,
            rules = table.endpoints.len(),
            "Policy resolver initialized"
        );

        Self {
            table: RwLock::new(table),
            environment: environment.to_string(),
            settings,
            protected: AtomicBool::new(false),
        }
    }

    /// Resolve the effective config for `path` and `method`.
    pub fn resolve(&self, path: &str, method: &str) -> RateLimitConfig {
        let config = self.settings.apply(self.base_config(path, method));
        debug!(
            path = %path,
            method = %method,
            requests = config.requests,
            window_ms = config.window,
            "Resolved rate limit config"
        );
        config
    }

    /// The matched config before environment adjustment.
    pub fn base_config(&self, path: &str, method: &str) -> RateLimitConfig {
        self.table.read().find(path, method).clone()
    }

    /// Install or replace the policy for `pattern`.
    ///
    /// `"default"` replaces the fallback, which must be a flat config. The
    /// table is left untouched when this returns an error.
    pub fn override_config(&self, pattern: &str, policy: impl Into<EndpointPolicy>) -> Result<()> {
        let policy = policy.into();

        if self.is_protected() {
            return Err(rejected_protected(pattern));
        }

        if let Err(e) = policy.validate() {
            warn!(pattern = %pattern, error = %e, "Rejected invalid rate limit config");
            return Err(e);
        }

        let mut table = self.table.write();

        // protect() flips the flag under the write lock
        if self.is_protected() {
            return Err(rejected_protected(pattern));
        }

        if pattern == DEFAULT_PATTERN {
            let EndpointPolicy::Flat(config) = policy else {
                return Err(TurnstileError::Configuration(
                    "default policy must be a single config".to_string(),
                ));
            };
            table.default = config;
        } else if let Some(rule) = table
            .endpoints
            .iter_mut()
            .find(|rule| rule.pattern.as_str() == pattern)
        {
            rule.policy = policy;
        } else {
            table.endpoints.push(EndpointRule::new(pattern, policy));
        }

        info!(pattern = %pattern, "Rate limit policy overridden");
        Ok(())
    }

    /// Freeze the table against further overrides.
    pub fn protect(&self) {
        let _table = self.table.write();
        self.protected.store(true, Ordering::SeqCst);
        info!("Policy table protected");
    }

    /// Whether [`protect`](PolicyResolver::protect) has been called.
    pub fn is_protected(&self) -> bool {
        self.protected.load(Ordering::SeqCst)
    }

    /// A snapshot of the current table.
    pub fn table(&self) -> PolicyTable {
        self.table.read().clone()
    }

    /// The environment name this resolver was created for.
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// The adjustment applied to every resolved config.
    pub fn environment_settings(&self) -> EnvironmentSettings {
        self.settings
    }
}
