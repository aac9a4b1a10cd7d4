//! Configuration for the authorizer, client and event subscriber
//!
//! All structs deserialize from TOML with every field optional; missing fields
//! take the defaults below.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{CacheError, Result};
use crate::request::AppId;
use crate::store::DEFAULT_TTL;

/// Longest accepted `cache_ttl_secs` (one year)
pub const MAX_CACHE_TTL_SECS: f64 = 365.0 * 24.0 * 60.0 * 60.0;

/// Event stream reconnection and shutdown settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriberConfig {
    /// Initial delay before reconnecting after a failure
    pub reconnect_delay_ms: u64,
    /// Upper bound on the reconnect delay
    pub max_reconnect_delay_ms: u64,
    /// Timeout for establishing the stream connection
    pub connect_timeout_ms: u64,
    /// How long `stop` waits for the background task to finish
    pub stop_timeout_ms: u64,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 5_000,
            max_reconnect_delay_ms: 60_000,
            connect_timeout_ms: 10_000,
            stop_timeout_ms: 5_000,
        }
    }
}

impl SubscriberConfig {
    /// Base reconnect delay
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Maximum reconnect delay
    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms)
    }

    /// Connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Shutdown join timeout
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Check the delays are usable
    pub fn validate(&self) -> Result<()> {
        if self.reconnect_delay_ms == 0 {
            return Err(CacheError::invalid_config(
                "events.reconnect_delay_ms",
                "must be greater than zero",
            ));
        }
        if self.max_reconnect_delay_ms < self.reconnect_delay_ms {
            return Err(CacheError::invalid_config(
                "events.max_reconnect_delay_ms",
                "must not be smaller than reconnect_delay_ms",
            ));
        }
        Ok(())
    }
}

/// Top-level configuration of an [`Authorizer`](crate::Authorizer)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizerConfig {
    /// Authorization service base URL
    pub base_url: String,
    /// Application whose policies are checked
    pub app_id: AppId,
    /// Lifetime of cached decisions, in seconds
    pub cache_ttl_secs: f64,
    /// Maximum number of cached decisions
    pub cache_max_size: usize,
    /// Subscribe to policy events for real-time invalidation
    pub enable_events: bool,
    /// Extra headers sent with every request (e.g. authentication)
    pub auth_headers: HashMap<String, String>,
    /// Principal type used when a caller does not name one
    pub default_principal_type: String,
    /// Resource type used for tool checks
    pub default_tool_resource_type: String,
    /// Timeout for a single authorize call
    pub request_timeout_ms: u64,
    /// Timeout for an entitlements lookup
    pub entitlements_timeout_ms: u64,
    /// Event subscriber settings
    pub events: SubscriberConfig,
}

impl Default for AuthorizerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            app_id: 1,
            cache_ttl_secs: 60.0,
            cache_max_size: 10_000,
            enable_events: true,
            auth_headers: HashMap::new(),
            default_principal_type: "User".to_string(),
            default_tool_resource_type: "Tool".to_string(),
            request_timeout_ms: 5_000,
            entitlements_timeout_ms: 10_000,
            events: SubscriberConfig::default(),
        }
    }
}

impl AuthorizerConfig {
    /// Parse a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| CacheError::invalid_config("config", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            CacheError::invalid_config(path.display().to_string(), e.to_string())
        })?;
        Self::from_toml_str(&source)
    }

    /// Base URL without a trailing slash
    pub fn normalized_base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Cache TTL as a duration, clamped to [`MAX_CACHE_TTL_SECS`]
    ///
    /// Values `validate` would reject (NaN, zero or negative) map to the
    /// default TTL.
    pub fn cache_ttl(&self) -> Duration {
        if self.cache_ttl_secs > 0.0 {
            Duration::try_from_secs_f64(self.cache_ttl_secs.min(MAX_CACHE_TTL_SECS))
                .unwrap_or(DEFAULT_TTL)
        } else {
            DEFAULT_TTL
        }
    }

    /// Authorize call timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Entitlements call timeout
    pub fn entitlements_timeout(&self) -> Duration {
        Duration::from_millis(self.entitlements_timeout_ms)
    }

    /// Event stream endpoint
    pub fn events_url(&self) -> String {
        format!("{}/v1/events", self.normalized_base_url())
    }

    /// Reject configurations the client cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.normalized_base_url().is_empty() {
            return Err(CacheError::invalid_config("base_url", "must not be empty"));
        }
        if !self.cache_ttl_secs.is_finite() || self.cache_ttl_secs <= 0.0 {
            return Err(CacheError::invalid_config(
                "cache_ttl_secs",
                "must be a positive number of seconds",
            ));
        }
        if self.cache_ttl_secs > MAX_CACHE_TTL_SECS {
            return Err(CacheError::invalid_config(
                "cache_ttl_secs",
                "must not exceed one year",
            ));
        }
        if self.cache_max_size == 0 {
            return Err(CacheError::invalid_config(
                "cache_max_size",
                "must be greater than zero",
            ));
        }
        if self.default_principal_type.trim().is_empty() {
            return Err(CacheError::invalid_config(
                "default_principal_type",
                "must not be empty",
            ));
        }
        if self.default_tool_resource_type.trim().is_empty() {
            return Err(CacheError::invalid_config(
                "default_tool_resource_type",
                "must not be empty",
            ));
        }
        self.events.validate()
    }
}
