use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";
const RAZORPAY_API_BASE: &str = "https://api.razorpay.com/v1";

/// Application configuration. Layered from `config/default.toml`, an optional
/// per-environment file, and `APP__*` environment variables (`__` separates
/// nesting). `jwt_secret` and `database_url` have no production default.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL (Postgres in production, SQLite in tests)
    pub database_url: String,

    /// JWT signing secret; required, never defaulted
    #[validate(length(min = 32))]
    pub jwt_secret: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    #[validate(range(min = 1024, max = 65535))]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback outside development
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// Minutes a pending request stays approvable before it expires
    #[serde(default = "default_request_expiry_minutes")]
    #[validate(range(min = 1))]
    pub request_expiry_minutes: i64,

    /// Interval of the background expiry sweep in seconds; 0 disables the
    /// sweep (expiry is still applied lazily on read)
    #[serde(default = "default_expiry_sweep_interval_secs")]
    pub expiry_sweep_interval_secs: u64,

    /// Razorpay API credentials
    #[serde(default)]
    pub razorpay_key_id: String,
    #[serde(default)]
    pub razorpay_key_secret: String,

    /// Razorpay API base URL; overridden in tests
    #[serde(default = "default_razorpay_api_base")]
    pub razorpay_api_base: String,

    /// Bound on every outbound gateway call (seconds)
    #[serde(default = "default_gateway_timeout_secs")]
    pub gateway_timeout_secs: u64,

    /// Currency used when an order request does not name one
    #[serde(default = "default_currency")]
    #[validate(length(min = 3, max = 3))]
    pub default_currency: String,

    /// Retention window of the status-change de-duplication set (seconds)
    #[serde(default = "default_notification_retention_secs")]
    pub notification_retention_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
}

fn default_db_timeout_secs() -> u64 {
    10
}

fn default_db_idle_timeout_secs() -> u64 {
    300
}

fn default_request_expiry_minutes() -> i64 {
    24 * 60
}

fn default_expiry_sweep_interval_secs() -> u64 {
    300
}

fn default_razorpay_api_base() -> String {
    RAZORPAY_API_BASE.to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    10
}

fn default_currency() -> String {
    "INR".to_string()
}

fn default_notification_retention_secs() -> u64 {
    10
}

impl AppConfig {
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
            || self.environment.eq_ignore_ascii_case("dev")
    }

    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    /// How long a freshly created request stays `pending` before it expires.
    pub fn request_expiry(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.request_expiry_minutes)
    }

    pub fn gateway_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.gateway_timeout_secs)
    }

    pub fn notification_retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.notification_retention_secs as i64)
    }
}

#[derive(Error, Debug)]
pub enum AppConfigError {
    #[error("configuration error: {0}")]
    Load(#[from] ConfigError),
    #[error("configuration validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Loads application configuration.
///
/// Layers configuration sources in this order:
/// 1. Default config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    // jwt_secret has no default: it must come from a config file or the
    // environment so an insecure fallback can never reach production.
    let config = Config::builder()
        .set_default("database_url", "sqlite://cyclehub.db?mode=rwc")?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET with a secure random string (minimum 32 characters).");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured. Set APP__JWT_SECRET environment variable."
                .into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("cyclehub_api={},tower_http=info", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> Config {
        Config::builder()
            .set_default("database_url", "sqlite::memory:")
            .unwrap()
            .set_override(
                "jwt_secret",
                "a_sufficiently_long_test_secret_value_0123456789",
            )
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn defaults_fill_everything_but_the_secrets() {
        let cfg: AppConfig = minimal_config().try_deserialize().unwrap();
        cfg.validate().unwrap();

        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.default_currency, "INR");
        assert_eq!(cfg.gateway_timeout_secs, 10);
        assert_eq!(cfg.request_expiry_minutes, 24 * 60);
        assert_eq!(cfg.notification_retention_secs, 10);
        assert!(cfg.is_development());
        assert!(cfg.should_allow_permissive_cors());
    }

    #[test]
    fn short_jwt_secret_fails_validation() {
        let config = Config::builder()
            .set_default("database_url", "sqlite::memory:")
            .unwrap()
            .set_override("jwt_secret", "short")
            .unwrap()
            .build()
            .unwrap();
        let cfg: AppConfig = config.try_deserialize().unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let config = Config::builder()
            .set_default("database_url", "sqlite::memory:")
            .unwrap()
            .set_override(
                "jwt_secret",
                "a_sufficiently_long_test_secret_value_0123456789",
            )
            .unwrap()
            .set_override("no_such_key", "value")
            .unwrap()
            .build()
            .unwrap();
        assert!(config.try_deserialize::<AppConfig>().is_err());
    }
}
