//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with defaults that
//! match a production deployment. A `.env` file is read first when present.
//!
//! # Mode
//!
//! - `APP_ENV`: `development` or `production` (default). Development mode
//!   adds the request logger and full error detail in responses.
//!
//! # Rate Limiting
//!
//! - `RATE_LIMIT_MAX`: requests per window per client (default: 100, 0 disables)
//! - `RATE_LIMIT_WINDOW_MS`: window length (default: 3600000, one hour)
//! - `RATE_LIMIT_SCOPE`: path prefix the limiter guards (default: `/api`)
//! - `RATE_LIMIT_MESSAGE`: rejection message
//! - `RATE_LIMIT_SWEEP_SECS`: expired entry sweep interval (default: 60)
//!
//! # Input Handling
//!
//! - `MAX_BODY_BYTES`: JSON body cap (default: 10240)
//! - `PUBLIC_DIR`: static asset root (default: `public`)
//! - `HPP_WHITELIST`: comma-separated query keys allowed to repeat

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::error_handler::Verbosity;
use crate::middleware::hpp::DEFAULT_WHITELIST;
use crate::middleware::rate_limit::{DEFAULT_MESSAGE, RateLimitConfig};

/// Deployment mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    Development,
    #[default]
    Production,
}

impl Environment {
    /// How much failure detail clients get in this mode.
    pub fn verbosity(&self) -> Verbosity {
        match self {
            Environment::Development => Verbosity::Verbose,
            Environment::Production => Verbosity::Minimal,
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!(
                "unknown environment '{other}', expected 'development' or 'production'"
            )),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => f.write_str("development"),
            Environment::Production => f.write_str("production"),
        }
    }
}

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 3000)
    pub port: u16,

    pub environment: Environment,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Requests per window per client (default: 100)
    /// Set to 0 to disable rate limiting
    pub rate_limit_max: u32,

    pub rate_limit_window: Duration,

    /// Path prefix under which requests are counted (default: "/api")
    pub rate_limit_scope: String,

    pub rate_limit_message: String,

    /// How often expired rate limit entries are dropped (default: 60 seconds)
    pub rate_limit_sweep_interval: Duration,

    /// Trusted proxy CIDR ranges for IP spoofing mitigation.
    /// Forwarding headers are only believed when the connection comes from
    /// one of these networks.
    ///
    /// Format: Comma-separated CIDR notation (e.g., "10.0.0.0/8,172.16.0.0/12")
    /// Default: Empty (forwarding headers ignored when the peer is known)
    pub trusted_proxies: Vec<String>,

    // =========================================================================
    // Input Configuration
    // =========================================================================
    /// Maximum JSON body size in bytes (default: 10 KB)
    pub max_body_bytes: usize,

    /// Directory served at the document root (default: "public")
    pub public_dir: PathBuf,

    /// Query keys allowed to repeat (default: tour filter fields)
    pub hpp_whitelist: Vec<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any value fails to parse or validate
    /// (e.g., non-numeric PORT, unknown APP_ENV).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 3000)?,
            environment: Self::parse_env("APP_ENV", Environment::Production)?,

            // Rate limiting
            rate_limit_max: Self::parse_env("RATE_LIMIT_MAX", 100)?,
            rate_limit_window: Duration::from_millis(Self::parse_env(
                "RATE_LIMIT_WINDOW_MS",
                60 * 60 * 1000,
            )?),
            rate_limit_scope: env::var("RATE_LIMIT_SCOPE").unwrap_or_else(|_| "/api".to_string()),
            rate_limit_message: env::var("RATE_LIMIT_MESSAGE")
                .ok()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_MESSAGE.to_string()),
            rate_limit_sweep_interval: Duration::from_secs(Self::parse_env(
                "RATE_LIMIT_SWEEP_SECS",
                60,
            )?),
            trusted_proxies: Self::parse_list("TRUSTED_PROXIES").unwrap_or_default(),

            // Input
            max_body_bytes: Self::parse_env("MAX_BODY_BYTES", 10 * 1024)?,
            public_dir: env::var("PUBLIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("public")),
            hpp_whitelist: Self::parse_list("HPP_WHITELIST").unwrap_or_else(default_whitelist),

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limiting_enabled() && self.rate_limit_window.is_zero() {
            return Err(ConfigError::Invalid {
                name: "RATE_LIMIT_WINDOW_MS",
                reason: "must be greater than 0 when rate limiting is enabled".to_string(),
            });
        }

        if !self.rate_limit_scope.starts_with('/') {
            return Err(ConfigError::Invalid {
                name: "RATE_LIMIT_SCOPE",
                reason: format!("'{}' must start with '/'", self.rate_limit_scope),
            });
        }

        if self.rate_limit_sweep_interval.is_zero() {
            return Err(ConfigError::Invalid {
                name: "RATE_LIMIT_SWEEP_SECS",
                reason: "must be greater than 0".to_string(),
            });
        }

        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid {
                name: "MAX_BODY_BYTES",
                reason: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    /// Check if rate limiting is enabled.
    pub fn rate_limiting_enabled(&self) -> bool {
        self.rate_limit_max > 0
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            max: self.rate_limit_max,
            window: self.rate_limit_window,
            scope_path: self.rate_limit_scope.clone(),
            message: self.rate_limit_message.clone(),
        }
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        self.metrics_enabled()
            .then(|| std::net::SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val.parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                reason: e.to_string(),
            }),
            Err(_) => Ok(default),
        }
    }

    /// Comma-separated list; `None` when unset or blank.
    fn parse_list(name: &str) -> Option<Vec<String>> {
        env::var(name)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(|s| split_list(&s))
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

fn default_whitelist() -> Vec<String> {
    DEFAULT_WHITELIST.iter().map(|k| k.to_string()).collect()
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 3000,
            environment: Environment::Production,
            // Rate limiting
            rate_limit_max: 100,
            rate_limit_window: Duration::from_millis(60 * 60 * 1000),
            rate_limit_scope: "/api".to_string(),
            rate_limit_message: DEFAULT_MESSAGE.to_string(),
            rate_limit_sweep_interval: Duration::from_secs(60),
            trusted_proxies: vec![],
            // Input
            max_body_bytes: 10 * 1024,
            public_dir: PathBuf::from("public"),
            hpp_whitelist: default_whitelist(),
            // Observability
            log_level: "info".to_string(),
            metrics_port: 9090,
        }
    }
}
