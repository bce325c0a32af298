use crate::error::{GuardError, Result};
use crate::rate_limit::algorithm::RateLimitAlgorithm;
use crate::rate_limit::key::DEFAULT_PREFIX;
use crate::rate_limit::registry::{LimitRegistry, RouteRule, ScopeRule};
use crate::rate_limit::types::LimitOverride;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main guard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Module-wide rate limiting options
    #[serde(default)]
    pub rate_limit: RateLimitOptions,
    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,
    /// Scope (path prefix) overrides
    #[serde(default)]
    pub scopes: Vec<ScopeRule>,
    /// Route overrides
    #[serde(default)]
    pub routes: Vec<RouteRule>,
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
    /// Emit JSON formatted logs
    #[serde(default)]
    pub json_logs: bool,
}

/// Module-wide rate limiting options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitOptions {
    /// Counting algorithm used for every route
    #[serde(default)]
    pub algorithm: RateLimitAlgorithm,
    /// Default window (seconds)
    #[serde(default)]
    pub window_secs: Option<u64>,
    /// Default limit per window
    #[serde(default)]
    pub limit: Option<u32>,
    /// Prefix for every counter key
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Guard every route, not only registered ones
    #[serde(default = "default_true")]
    pub global: bool,
    /// Default rejection message
    #[serde(default)]
    pub message: Option<String>,
    /// Status code used for rejections
    #[serde(default = "default_status_code")]
    pub status_code: u16,
    /// Identify callers by the first `X-Forwarded-For` hop
    #[serde(default)]
    pub trust_proxy: bool,
    /// Behaviour when the counter store is unreachable
    #[serde(default)]
    pub on_store_error: StoreFailurePolicy,
}

/// What the guard does when a store call fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreFailurePolicy {
    /// Surface the error to the host framework (503)
    #[default]
    FailClosed,
    /// Log and allow the request
    FailOpen,
}

/// Counter store backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process store, not shared between instances
    #[default]
    Memory,
    /// Shared Redis store
    Redis,
}

/// Counter store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Redis connection URL
    #[serde(default)]
    pub url: Option<String>,
    /// How often the in-process store purges idle keys (seconds)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
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

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_status_code() -> u16 {
    StatusCode::TOO_MANY_REQUESTS.as_u16()
}

fn default_sweep_interval() -> u64 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            json_logs: false,
        }
    }
}

impl Default for RateLimitOptions {
    fn default() -> Self {
        Self {
            algorithm: RateLimitAlgorithm::default(),
            window_secs: None,
            limit: None,
            prefix: default_prefix(),
            global: true,
            message: None,
            status_code: default_status_code(),
            trust_proxy: false,
            on_store_error: StoreFailurePolicy::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: None,
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl RateLimitOptions {
    /// Module defaults as the least specific override
    pub fn defaults(&self) -> LimitOverride {
        LimitOverride {
            window_secs: self.window_secs,
            limit: self.limit,
            key: None,
            message: self.message.clone(),
        }
    }

    /// Rejection status code
    pub fn status(&self) -> Result<StatusCode> {
        let status = StatusCode::from_u16(self.status_code).map_err(|_| {
            GuardError::Config(format!("Invalid status code: {}", self.status_code))
        })?;

        if !status.is_client_error() && !status.is_server_error() {
            return Err(GuardError::Config(format!(
                "Rejection status must be 4xx or 5xx, got {}",
                self.status_code
            )));
        }
        Ok(status)
    }

    /// Validate module options
    pub fn validate(&self) -> Result<()> {
        self.defaults().validate("module defaults")?;

        if self.prefix.is_empty() {
            return Err(GuardError::Config(
                "Rate limit key prefix cannot be empty".to_string(),
            ));
        }

        self.status()?;
        Ok(())
    }
}

impl GuardConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GuardError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GuardError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.rate_limit.validate()?;

        if self.store.backend == StoreBackend::Redis
            && self.store.url.as_deref().map_or(true, str::is_empty)
        {
            return Err(GuardError::Config(
                "Redis store requires a url".to_string(),
            ));
        }

        if self.store.backend == StoreBackend::Memory && self.store.sweep_interval_secs == 0 {
            return Err(GuardError::Config(
                "Store sweep interval must be > 0".to_string(),
            ));
        }

        // Scope and route rules are validated while building the registry
        self.registry()?;

        Ok(())
    }

    /// Build the override registry from scope and route rules
    pub fn registry(&self) -> Result<LimitRegistry> {
        LimitRegistry::from_rules(&self.scopes, &self.routes)
    }

    /// Create a default configuration for testing
    pub fn default_config() -> Self {
        Self {
            server: ServerConfig::default(),
            rate_limit: RateLimitOptions::default(),
            store: StoreConfig::default(),
            scopes: vec![],
            routes: vec![],
        }
    }
}
