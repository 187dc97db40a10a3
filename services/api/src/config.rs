//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use compliance_core::dates::{is_valid_pattern, DEFAULT_DATE_FORMAT};
use compliance_core::expiration::DEFAULT_EXPIRING_THRESHOLD_DAYS;
use compliance_core::notification::DEFAULT_NOTIFICATION_WINDOW_DAYS;
use compliance_core::plans::{Plan, PlanCatalog};
use compliance_core::trial::DEFAULT_TRIAL_DAYS;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

/// Upper bound for the day-count settings.
pub const MAX_RULE_DAYS: i64 = 36_500;
const MAX_PROCESSOR_TIMEOUT_SECS: i64 = 600;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
    #[error("Could not load the plan catalog from {0}: {1}")]
    PlanCatalog(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub cors_origin: String,
    pub processor_base_url: String,
    pub processor_api_key: Option<String>,
    pub processor_timeout: Duration,
    pub plans_path: PathBuf,
    pub expiring_threshold_days: i64,
    pub notification_window_days: i64,
    pub trial_days: i64,
    pub date_format: String,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Server and Database Settings ---
        let bind_address_str = var("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url =
            var("DATABASE_URL").ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let cors_origin = var("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:5173".to_string());

        // --- Payment Processor ---
        let processor_base_url = var("PROCESSOR_BASE_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .ok_or_else(|| ConfigError::MissingVar("PROCESSOR_BASE_URL".to_string()))?;
        let processor_api_key = var("PROCESSOR_API_KEY").filter(|key| !key.is_empty());
        let processor_timeout_secs =
            parse_number(&var, "PROCESSOR_TIMEOUT_SECS", 15, MAX_PROCESSOR_TIMEOUT_SECS)?;
        let processor_timeout = Duration::from_secs(processor_timeout_secs as u64);

        let plans_path = var("PLANS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./plans.json"));

        // --- Compliance Rules ---
        let expiring_threshold_days = parse_number(
            &var,
            "EXPIRING_THRESHOLD_DAYS",
            DEFAULT_EXPIRING_THRESHOLD_DAYS,
            MAX_RULE_DAYS,
        )?;
        let notification_window_days = parse_number(
            &var,
            "NOTIFICATION_WINDOW_DAYS",
            DEFAULT_NOTIFICATION_WINDOW_DAYS,
            MAX_RULE_DAYS,
        )?;
        let trial_days = parse_number(&var, "TRIAL_DAYS", DEFAULT_TRIAL_DAYS, MAX_RULE_DAYS)?;

        let date_format = var("DATE_FORMAT").unwrap_or_else(|| DEFAULT_DATE_FORMAT.to_string());
        if !is_valid_pattern(&date_format) {
            return Err(ConfigError::InvalidValue(
                "DATE_FORMAT".to_string(),
                format!("'{}' is not a valid date pattern", date_format),
            ));
        }

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            cors_origin,
            processor_base_url,
            processor_api_key,
            processor_timeout,
            plans_path,
            expiring_threshold_days,
            notification_window_days,
            trial_days,
            date_format,
        })
    }
}

/// Reads an integer in `0..=max`, falling back to `default` when unset.
fn parse_number<F>(var: &F, name: &str, default: i64, max: i64) -> Result<i64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<i64>() {
            Ok(value) if (0..=max).contains(&value) => Ok(value),
            _ => Err(ConfigError::InvalidValue(
                name.to_string(),
                format!("'{}' is not a whole number between 0 and {}", raw, max),
            )),
        },
    }
}

/// Reads the plan catalog JSON (an array of plans).
pub fn load_plan_catalog(path: &Path) -> Result<PlanCatalog, ConfigError> {
    let display = path.display().to_string();
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::PlanCatalog(display.clone(), e.to_string()))?;
    parse_plan_catalog(&raw).map_err(|e| ConfigError::PlanCatalog(display, e))
}

fn parse_plan_catalog(raw: &str) -> Result<PlanCatalog, String> {
    let plans: Vec<Plan> = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    PlanCatalog::new(plans).map_err(|e| e.to_string())
}
