//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::{net::IpAddr, path::PathBuf};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub instance: InstanceConfig,
    pub admin: AdminConfig,
    pub auth: AuthConfig,
    pub federation: FederationConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public domain (e.g., "books.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl ServerConfig {
    /// Get the base URL for the instance
    ///
    /// # Returns
    /// Full URL like "https://books.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// Instance metadata
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceConfig {
    pub name: String,
    pub description: String,
    /// Items per page for feeds, replies and import views
    pub page_length: usize,
}

/// Bootstrap admin user, created on first start
#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    /// Admin localname (default: "admin")
    #[serde(default = "default_admin_localname")]
    pub localname: String,
    /// Admin display name (default: "Admin")
    #[serde(default = "default_admin_display_name")]
    pub display_name: String,
    pub email: Option<String>,
}

fn default_admin_localname() -> String {
    "admin".to_string()
}

fn default_admin_display_name() -> String {
    "Admin".to_string()
}

/// Session token configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Session secret key (32+ bytes)
    pub session_secret: String,
    /// Session max age in seconds (default: 604800 = 7 days)
    pub session_max_age: i64,
}

/// Outbound federation settings
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// Scheme used for webfinger lookups on other servers
    pub remote_scheme: String,
    /// Max concurrent deliveries per broadcast
    pub delivery_concurrency: usize,
    /// Timeout for one delivery batch in seconds
    pub delivery_timeout_secs: u64,
    /// RSA modulus size for new key pairs
    pub key_bits: usize,
    /// Allow fetching from loopback/private addresses (local testing only)
    #[serde(default)]
    pub allow_private_hosts: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (QUIRE__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.protocol", "http")?
            .set_default("database.path", "data/quire.db")?
            .set_default("instance.name", "Quire")?
            .set_default("instance.description", "Social reading and reviewing")?
            .set_default("instance.page_length", 15)?
            .set_default("auth.session_max_age", 604800)?
            .set_default("federation.remote_scheme", "https")?
            .set_default("federation.delivery_concurrency", 10)?
            .set_default("federation.delivery_timeout_secs", 30)?
            .set_default("federation.key_bits", 2048)?
            .set_default("federation.allow_private_hosts", false)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (QUIRE__*)
            .add_source(
                Environment::with_prefix("QUIRE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn should_use_secure_cookies(&self) -> bool {
        self.server.protocol.eq_ignore_ascii_case("https")
            || !is_local_server_domain(&self.server.domain)
    }

    pub fn validate(&self) -> Result<(), crate::error::AppError> {
        const MIN_SESSION_SECRET_BYTES: usize = 32;

        if self.auth.session_secret.as_bytes().len() < MIN_SESSION_SECRET_BYTES {
            return Err(crate::error::AppError::Config(format!(
                "auth.session_secret must be at least {} bytes",
                MIN_SESSION_SECRET_BYTES
            )));
        }

        if self.auth.session_max_age <= 0 {
            return Err(crate::error::AppError::Config(
                "auth.session_max_age must be greater than 0".to_string(),
            ));
        }

        if self.instance.page_length == 0 {
            return Err(crate::error::AppError::Config(
                "instance.page_length must be greater than 0".to_string(),
            ));
        }

        if self.federation.delivery_concurrency == 0 {
            return Err(crate::error::AppError::Config(
                "federation.delivery_concurrency must be greater than 0".to_string(),
            ));
        }

        if !matches!(self.federation.remote_scheme.as_str(), "http" | "https") {
            return Err(crate::error::AppError::Config(
                "federation.remote_scheme must be http or https".to_string(),
            ));
        }

        if !self.should_use_secure_cookies() {
            let host = normalized_server_host(&self.server.domain);
            tracing::warn!(
                host = %host,
                protocol = %self.server.protocol,
                "Using insecure session cookies for local development"
            );
        } else if !self.server.protocol.eq_ignore_ascii_case("https") {
            return Err(crate::error::AppError::Config(
                "server.protocol must be https for non-local server domains".to_string(),
            ));
        }

        Ok(())
    }
}

fn normalized_server_host(domain: &str) -> String {
    let trimmed = domain.trim();
    let parsed_host = url::Url::parse(&format!("http://{trimmed}"))
        .ok()
        .and_then(|url| url.host_str().map(|host| host.to_string()));
    let host = parsed_host.unwrap_or_else(|| trimmed.to_string());
    host.trim_end_matches('.').to_ascii_lowercase()
}

fn is_local_server_domain(domain: &str) -> bool {
    let host = normalized_server_host(domain);
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return ip.is_loopback() || ip.is_unspecified();
    }

    false
}
