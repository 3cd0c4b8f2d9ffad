use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Root configuration document, loaded once at startup from YAML.
///
/// Hot reload (per the design notes) would wrap this behind an
/// `arc_swap::ArcSwap<Config>`; the core here only needs the immutable
/// snapshot readers capture at request entry, so the swap point lives in
/// `AppState` rather than in this type.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub routes: Vec<RouteConfig>,
    pub upstreams: HashMap<String, UpstreamConfig>,
    #[serde(default)]
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_mode() -> String {
    "development".into()
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    pub path: String,
    pub methods: Vec<String>,
    pub upstream: String,
    #[serde(default)]
    pub middlewares: Vec<String>,
    /// Roles required to pass the rbac middleware on this route. Empty means
    /// "no role check" even when "rbac" is listed in `middlewares`.
    #[serde(default)]
    pub required_roles: Vec<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancerStrategy {
    RoundRobin,
    LeastConnections,
}

impl Default for LoadBalancerStrategy {
    fn default() -> Self {
        LoadBalancerStrategy::RoundRobin
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    pub urls: Vec<String>,
    #[serde(default, rename = "load_balancer")]
    pub load_balancer: LoadBalancerStrategy,
    #[serde(default = "default_request_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub count: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_backoff_ms() -> u64 {
    100
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            count: 0,
            backoff_ms: default_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_ms() -> u64 {
    30_000
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub jwt: JwtConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JwtConfig {
    #[serde(default)]
    pub issuer: String,
    #[serde(default)]
    pub audience: String,
    pub public_key_path: Option<String>,
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub global_per_minute: u64,
    #[serde(default)]
    pub per_ip: u64,
    #[serde(default)]
    pub per_route: u64,
}

impl Config {
    /// Cross-field validation not expressible through serde defaults.
    /// A `ConfigInvalid` condition here is fatal at startup (§7).
    pub fn validate(&self) -> Result<()> {
        if self.routes.is_empty() {
            bail!("config invalid: no routes configured");
        }
        for route in &self.routes {
            if !self.upstreams.contains_key(&route.upstream) {
                bail!(
                    "config invalid: route '{}' references unknown upstream '{}'",
                    route.path,
                    route.upstream
                );
            }
            if route.methods.is_empty() {
                bail!("config invalid: route '{}' has no methods", route.path);
            }
        }
        for (name, upstream) in &self.upstreams {
            if upstream.urls.is_empty() {
                bail!("config invalid: upstream '{}' has no urls", name);
            }
        }
        if self
            .routes
            .iter()
            .any(|r| r.middlewares.iter().any(|m| m == "jwt"))
            && self.security.jwt.secret.is_none()
            && self.security.jwt.public_key_path.is_none()
        {
            bail!("config invalid: jwt middleware requested but no secret or public_key_path configured");
        }
        Ok(())
    }
}

/// Loads and validates the configuration document. Path defaults to
/// `config/gateway.yaml`, overridable by `--config` (see `cli.rs`) or the
/// `GATEWAY_CONFIG` environment variable.
pub fn load(path: &str) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file '{}'", path))?;
    let cfg: Config = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse config file '{}'", path))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Resolves the config file path from CLI override, env var, then default.
pub fn resolve_path(cli_override: Option<&str>) -> String {
    cli_override
        .map(String::from)
        .or_else(|| std::env::var("GATEWAY_CONFIG").ok())
        .unwrap_or_else(|| "config/gateway.yaml".to_string())
}
