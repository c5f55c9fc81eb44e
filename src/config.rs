use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::env;
use std::path::Path;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

/// Payment gateway connection settings (shared-secret signature scheme).
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct GatewayConfig {
    /// Base URL of the gateway API
    #[serde(default = "default_gateway_url")]
    pub base_url: String,
    /// Public key id sent with intent-creation requests
    pub key_id: String,
    /// Shared secret used both for API auth and callback signatures
    #[validate(length(min = 16))]
    pub key_secret: String,
    /// ISO currency code used for intents
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_gateway_url() -> String {
    "https://api.gateway.example.com/v1".to_string()
}

fn default_currency() -> String {
    "INR".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_gateway_url(),
            key_id: "test_key_id".to_string(),
            key_secret: "test_key_secret_0123456789abcdef".to_string(),
            currency: default_currency(),
        }
    }
}

/// Application configuration with validation.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment (development/test/production)
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

    /// Maximum database connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// Minimum database connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// Order tax rate, e.g. 0.18 for 18% GST
    #[serde(default = "default_tax_rate")]
    pub tax_rate: Decimal,

    /// Platform commission rate on each line item, e.g. 0.10 for 10%
    #[serde(default = "default_commission_rate")]
    pub commission_rate: Decimal,

    /// Payment gateway settings
    #[serde(default)]
    pub gateway: GatewayConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
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

fn default_tax_rate() -> Decimal {
    dec!(0.18)
}

fn default_commission_rate() -> Decimal {
    dec!(0.10)
}

impl AppConfig {
    /// Minimal constructor used by tests.
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            tax_rate: default_tax_rate(),
            commission_rate: default_commission_rate(),
            gateway: GatewayConfig::default(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

/// Loads layered configuration: `config/default.toml`, then an
/// environment-specific file, then `APP_*` environment variable overrides
/// (e.g. `APP_DATABASE_URL`, `APP_GATEWAY__KEY_SECRET`).
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_env = env::var("APP_ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let mut builder = Config::builder()
        .set_default("environment", run_env.clone())?
        .add_source(File::from(Path::new(CONFIG_DIR).join("default")).required(false))
        .add_source(File::from(Path::new(CONFIG_DIR).join(&run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"));

    // Bare DATABASE_URL wins over files for twelve-factor deployments.
    if let Ok(url) = env::var("DATABASE_URL") {
        builder = builder.set_override("database_url", url)?;
    }

    let cfg: AppConfig = builder.build()?.try_deserialize()?;
    cfg.validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {e}")))?;
    Ok(cfg)
}

/// Initializes the tracing subscriber. Safe to call once per process.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("marketplace_api={level},tower_http=info")));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_rates_and_pool_sizes() {
        let cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            0,
            "test".to_string(),
        );
        assert_eq!(cfg.tax_rate, dec!(0.18));
        assert_eq!(cfg.commission_rate, dec!(0.10));
        assert!(!cfg.is_production());
        assert_eq!(cfg.db_min_connections, 1);
    }

    #[test]
    fn gateway_defaults_are_test_credentials() {
        let gw = GatewayConfig::default();
        assert!(gw.key_secret.len() >= 16);
        assert_eq!(gw.currency, "INR");
    }
}
