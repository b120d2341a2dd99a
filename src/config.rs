use chrono::{FixedOffset, Offset, Utc};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::webhooks::signature::SignatureScheme;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";
const DEFAULT_WHATSAPP_API_BASE: &str = "https://graph.facebook.com/v19.0";

/// Settings that must be supplied explicitly; there is no safe default.
const REQUIRED_KEYS: [&str; 2] = [
    "payment_gateway.secret_key",
    "payment_gateway.signature_scheme",
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Memory,
    Database,
}

/// Bill-payment provider settings.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct PaymentGatewayConfig {
    #[validate(url)]
    pub base_url: String,
    #[validate(length(min = 1, message = "payment gateway secret key is required"))]
    pub secret_key: String,
    #[validate(length(min = 1, message = "payment gateway category code is required"))]
    pub category_code: String,
    /// Where the buyer's browser lands after paying.
    #[validate(url)]
    pub return_url: String,
    /// Server-to-server callback; must route to `POST /api/v1/payments/callback`.
    #[validate(url)]
    pub callback_url: String,
    pub signature_scheme: SignatureScheme,
    /// Acknowledge callbacks for orders we cannot find instead of answering 404.
    #[serde(default = "default_true_bool")]
    pub ack_unknown_orders: bool,
    /// `0` FPX, `1` card, `2` both.
    #[serde(default = "default_payment_channel")]
    pub payment_channel: String,
    #[serde(default = "default_gateway_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub request_timeout_secs: u64,
}

impl PaymentGatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// WhatsApp Cloud API settings. Disabled messaging logs messages instead of
/// sending them.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct MessagingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_whatsapp_api_base")]
    #[validate(url)]
    pub api_base_url: String,
    #[serde(default)]
    pub phone_number_id: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    /// Operations phone that receives the admin copy of every order.
    #[serde(default)]
    pub admin_phone: Option<String>,
    #[serde(default = "default_country_code")]
    #[validate(custom = "validate_country_code")]
    pub default_country_code: String,
    #[serde(default = "default_messaging_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_base_url: default_whatsapp_api_base(),
            phone_number_id: None,
            access_token: None,
            admin_phone: None,
            default_country_code: default_country_code(),
            request_timeout_secs: default_messaging_timeout_secs(),
        }
    }
}

/// Hosted AI flow endpoints (delivery-photo verification, e-invoicing).
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AiFlowsConfig {
    #[serde(default)]
    #[validate(url)]
    pub base_url: Option<String>,
    #[serde(default = "default_delivery_verification_timeout_secs")]
    #[validate(range(min = 1, max = 600))]
    pub delivery_verification_timeout_secs: u64,
    #[serde(default = "default_e_invoice_timeout_secs")]
    #[validate(range(min = 1, max = 600))]
    pub e_invoice_timeout_secs: u64,
}

impl Default for AiFlowsConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            delivery_verification_timeout_secs: default_delivery_verification_timeout_secs(),
            e_invoice_timeout_secs: default_e_invoice_timeout_secs(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,

    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,

    #[serde(default)]
    pub storage_backend: StorageBackend,
    #[serde(default)]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,
    #[serde(default = "default_true_bool")]
    pub auto_migrate: bool,

    /// Offset of the business time zone used for order-number dates.
    #[serde(default = "default_business_utc_offset_minutes")]
    #[validate(range(min = -720, max = 840))]
    pub business_utc_offset_minutes: i32,

    /// Base of the admin dashboard used for deep links in admin messages.
    #[validate(url)]
    pub admin_base_url: String,

    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_api_page_size")]
    pub default_page_size: u64,
    #[serde(default = "default_api_max_page_size")]
    pub max_page_size: u64,

    #[validate]
    pub payment_gateway: PaymentGatewayConfig,
    #[serde(default)]
    #[validate]
    pub messaging: MessagingConfig,
    #[serde(default)]
    #[validate]
    pub ai_flows: AiFlowsConfig,
}

impl AppConfig {
    /// Development defaults around an explicit gateway configuration.
    pub fn new(payment_gateway: PaymentGatewayConfig) -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            environment: DEFAULT_ENV.into(),
            log_level: default_log_level(),
            log_json: false,
            storage_backend: StorageBackend::Memory,
            database_url: String::new(),
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            auto_migrate: true,
            business_utc_offset_minutes: default_business_utc_offset_minutes(),
            admin_base_url: "http://localhost:3000".into(),
            cors_allowed_origins: Vec::new(),
            request_timeout_secs: default_request_timeout_secs(),
            default_page_size: default_api_page_size(),
            max_page_size: default_api_max_page_size(),
            payment_gateway,
            messaging: MessagingConfig::default(),
            ai_flows: AiFlowsConfig::default(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn business_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.business_utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.storage_backend == StorageBackend::Database && self.database_url.trim().is_empty()
        {
            let mut err = ValidationError::new("database_url");
            err.message = Some("database_url is required when storage_backend = database".into());
            errors.add("database_url", err);
        }

        if self.messaging.enabled
            && (self.messaging.phone_number_id.is_none() || self.messaging.access_token.is_none())
        {
            let mut err = ValidationError::new("messaging");
            err.message = Some(
                "messaging.phone_number_id and messaging.access_token are required when messaging is enabled"
                    .into(),
            );
            errors.add("messaging", err);
        }

        if self.is_production() && self.cors_allowed_origins.is_empty() {
            let mut err = ValidationError::new("cors_allowed_origins");
            err.message = Some("cors_allowed_origins must be set in production".into());
            errors.add("cors_allowed_origins", err);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_true_bool() -> bool {
    true
}
fn default_payment_channel() -> String {
    "0".to_string()
}
fn default_gateway_timeout_secs() -> u64 {
    15
}
fn default_whatsapp_api_base() -> String {
    DEFAULT_WHATSAPP_API_BASE.to_string()
}
fn default_country_code() -> String {
    "60".to_string()
}
fn default_messaging_timeout_secs() -> u64 {
    10
}
fn default_delivery_verification_timeout_secs() -> u64 {
    60
}
fn default_e_invoice_timeout_secs() -> u64 {
    90
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}
fn default_business_utc_offset_minutes() -> i32 {
    8 * 60
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_api_page_size() -> u64 {
    20
}
fn default_api_max_page_size() -> u64 {
    100
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_country_code(code: &str) -> Result<(), ValidationError> {
    let valid = (1..=3).contains(&code.len())
        && code.chars().all(|c| c.is_ascii_digit())
        && !code.starts_with('0');
    if valid {
        Ok(())
    } else {
        let mut err = ValidationError::new("default_country_code");
        err.message = Some("Must be 1-3 digits without a leading zero, e.g. 60".into());
        Err(err)
    }
}

/// Initializes tracing using the provided log level as the default filter.
/// `RUST_LOG` overrides the default directive when set.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("produce_orders={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
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

    let config = Config::builder()
        .set_default("host", "0.0.0.0")?
        .set_default("port", 8080)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("admin_base_url", "http://localhost:3000")?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(
            Environment::with_prefix("APP")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("cors_allowed_origins")
                .try_parsing(true),
        )
        .build()?;

    for key in REQUIRED_KEYS {
        if config.get_string(key).is_err() {
            let env_name = format!("APP__{}", key.replace('.', "__").to_uppercase());
            error!("{} is not configured. Set {} or add it to config/{}.toml", key, env_name, run_env);
            return Err(AppConfigError::Load(ConfigError::NotFound(format!(
                "{key} is required but not configured"
            ))));
        }
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
