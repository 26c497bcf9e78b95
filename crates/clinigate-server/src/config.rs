//! Server configuration.
//!
//! Loaded from a TOML file overlaid with `CLINIGATE__SECTION__KEY`
//! environment variables, e.g. `CLINIGATE__SERVER__PORT=9090` or
//! `CLINIGATE__ACCESS__STORE_TIMEOUT=500ms`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use clinigate_access::AccessConfig;
use clinigate_db_memory::SeedConfig;
use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Listener and request handling.
    pub server: ServerConfig,
    /// Log output.
    pub logging: LoggingConfig,
    /// Access pipeline.
    pub access: AccessConfig,
    /// Data loaded into the in-memory stores at startup.
    pub seed: SeedConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound for a whole request, handler included.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Requests processed concurrently before new ones wait.
    pub max_concurrent_requests: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout: Duration::from_secs(30),
            max_concurrent_requests: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Configuration loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config build error: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("access config error: {0}")]
    Access(#[from] clinigate_access::ConfigError),
}

impl AppConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must be > 0".into()));
        }
        if self.server.request_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "server.request_timeout must be > 0".into(),
            ));
        }
        if self.server.max_concurrent_requests == 0 {
            return Err(ConfigError::Invalid(
                "server.max_concurrent_requests must be > 0".into(),
            ));
        }

        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "logging.level must be one of {valid_levels:?}"
            )));
        }

        self.access.validate()?;

        // A store call that outlives the request would be cancelled anyway.
        let budget = self.access.max_store_budget();
        if budget >= self.server.request_timeout {
            return Err(ConfigError::Invalid(format!(
                "store timeouts ({budget:?}) must be shorter than server.request_timeout ({:?})",
                self.server.request_timeout
            )));
        }
        Ok(())
    }

    /// Socket address to listen on. An unparsable host binds all interfaces.
    pub fn addr(&self) -> SocketAddr {
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        SocketAddr::from((host, self.server.port))
    }
}

pub mod loader {
    use std::path::PathBuf;

    use ::config::{Config, Environment, File};

    use super::{AppConfig, ConfigError};

    /// Default configuration file name.
    pub const DEFAULT_CONFIG_PATH: &str = "clinigate.toml";

    /// Loads, overlays and validates the configuration.
    ///
    /// A missing file is not an error; defaults and environment apply.
    pub fn load_config(path: Option<&str>) -> Result<AppConfig, ConfigError> {
        let mut builder = Config::builder();

        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }

        // Environment variable overrides, e.g., CLINIGATE__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("CLINIGATE")
                .try_parsing(true)
                .separator("__"),
        );

        let merged: AppConfig = builder.build()?.try_deserialize()?;
        merged.validate()?;
        Ok(merged)
    }
}
