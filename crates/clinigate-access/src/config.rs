//! Access pipeline configuration.
//!
//! # Example (TOML)
//!
//! ```toml
//! [access]
//! jwt_secret = "..."
//! store_timeout = "2s"
//!
//! [access.region]
//! default_region = "US"
//! ttl = "5m"
//!
//! [access.rate_limit]
//! requests_per_window = 100
//! window = "1m"
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Secret used when none is configured. Only suitable for local development.
pub const DEV_JWT_SECRET: &str = "dev-secret-change-me";

/// Root configuration for the access pipeline.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AccessConfig {
    /// HS256 secret used to verify bearer tokens.
    pub jwt_secret: String,

    /// Budget for every role/permission and audit store call.
    #[serde(with = "humantime_serde")]
    pub store_timeout: Duration,

    /// Honour `X-Forwarded-For` / `X-Forwarded-Proto` from a trusted proxy.
    pub trust_forwarded_headers: bool,

    /// Region policy cache configuration.
    pub region: RegionConfig,

    /// Admission control configuration.
    pub rate_limit: RateLimitConfig,

    /// Audit configuration.
    pub audit: AuditConfig,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            jwt_secret: DEV_JWT_SECRET.to_string(),
            store_timeout: Duration::from_secs(2),
            trust_forwarded_headers: false,
            region: RegionConfig::default(),
            rate_limit: RateLimitConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

/// Region policy cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegionConfig {
    /// Region used when neither an explicit signal nor the IP lookup yields one.
    pub default_region: String,

    /// Maximum staleness of a cached policy.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Lifetime of a cached IP → region mapping.
    #[serde(with = "humantime_serde")]
    pub ip_ttl: Duration,

    /// Budget for a policy or IP lookup, independent of the request deadline.
    #[serde(with = "humantime_serde")]
    pub load_timeout: Duration,

    /// How often expired cache entries are swept.
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,

    /// Fail requests when the policy cannot be loaded instead of falling back.
    pub mandatory: bool,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            default_region: "US".to_string(),
            ttl: Duration::from_secs(300),
            ip_ttl: Duration::from_secs(3600),
            load_timeout: Duration::from_secs(5),
            cleanup_interval: Duration::from_secs(60),
            mandatory: false,
        }
    }
}

/// Admission control configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests admitted per window when the region sets no limit.
    pub requests_per_window: u32,

    /// Sliding window length.
    #[serde(with = "humantime_serde")]
    pub window: Duration,

    /// How often idle buckets are reclaimed.
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 100,
            window: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Audit configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Record granted requests after the handler ran.
    pub log_access_decisions: bool,

    /// Record rejected requests.
    pub log_denials: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_access_decisions: true,
            log_denials: true,
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl AccessConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a secret is empty, a limit or interval is
    /// zero, or the default region is blank.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.trim().is_empty() {
            return Err(ConfigError::Missing("access.jwt_secret".to_string()));
        }

        if self.store_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "access.store_timeout must be > 0".to_string(),
            ));
        }

        if self.region.default_region.trim().is_empty() {
            return Err(ConfigError::Missing(
                "access.region.default_region".to_string(),
            ));
        }

        if self.region.load_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "access.region.load_timeout must be > 0".to_string(),
            ));
        }

        if self.region.cleanup_interval.is_zero() || self.rate_limit.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "cleanup intervals must be > 0".to_string(),
            ));
        }

        if self.rate_limit.requests_per_window == 0 {
            return Err(ConfigError::InvalidValue(
                "access.rate_limit.requests_per_window must be > 0".to_string(),
            ));
        }

        if self.rate_limit.window.is_zero() {
            return Err(ConfigError::InvalidValue(
                "access.rate_limit.window must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Longest budget any single backing-store call may use.
    #[must_use]
    pub fn max_store_budget(&self) -> Duration {
        self.store_timeout.max(self.region.load_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = AccessConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.region.load_timeout, Duration::from_secs(5));
        assert_eq!(config.max_store_budget(), Duration::from_secs(5));
    }

    #[test]
    fn test_empty_secret_fails_validation() {
        let mut config = AccessConfig::default();
        config.jwt_secret = "  ".to_string();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
        assert!(err.to_string().contains("jwt_secret"));
    }

    #[test]
    fn test_zero_rate_limit_fails_validation() {
        let mut config = AccessConfig::default();
        config.rate_limit.requests_per_window = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("requests_per_window"));
    }

    #[test]
    fn test_humantime_durations_deserialize() {
        let json = r#"{"store_timeout":"750ms","region":{"ttl":"10m"},"rate_limit":{"window":"30s"}}"#;
        let config: AccessConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.store_timeout, Duration::from_millis(750));
        assert_eq!(config.region.ttl, Duration::from_secs(600));
        assert_eq!(config.rate_limit.window, Duration::from_secs(30));
        assert_eq!(config.region.default_region, "US");
    }
}
