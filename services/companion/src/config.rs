//! services/companion/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::time::Duration;
use tracing::Level;

use minduni_core::ProvisioningPolicy;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Connection parameters that address one backing service instance.
#[derive(Clone, Debug)]
pub struct BackendConfig {
    pub project_id: String,
    pub api_key: String,
    pub database_url: String,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub backend: BackendConfig,
    pub log_level: Level,
    pub min_password_len: usize,
    pub provisioning: ProvisioningPolicy,
    pub chat_reply_delay: Duration,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Backing service instance ---
        let project_id = lookup("BACKEND_PROJECT_ID")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("BACKEND_PROJECT_ID".to_string()))?;
        let api_key = lookup("BACKEND_API_KEY")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("BACKEND_API_KEY".to_string()))?;
        let database_url = lookup("DATABASE_URL")
            .unwrap_or_else(|| "sqlite://minduni.db?mode=rwc".to_string());

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Session and journal behaviour ---
        let min_password_len = parse_or(&lookup, "MIN_PASSWORD_LEN", 6usize)?;
        let attempts = parse_or(&lookup, "PROFILE_PROVISION_ATTEMPTS", 3u32)?;
        if attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "PROFILE_PROVISION_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let backoff_ms = parse_or(&lookup, "PROFILE_PROVISION_BACKOFF_MS", 200u64)?;
        let chat_delay_ms = parse_or(&lookup, "CHAT_REPLY_DELAY_MS", 1500u64)?;

        Ok(Self {
            backend: BackendConfig {
                project_id,
                api_key,
                database_url,
            },
            log_level,
            min_password_len,
            provisioning: ProvisioningPolicy {
                attempts,
                backoff: Duration::from_millis(backoff_ms),
            },
            chat_reply_delay: Duration::from_millis(chat_delay_ms),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        None => Ok(default),
    }
}
