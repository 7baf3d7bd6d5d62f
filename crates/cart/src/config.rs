//! Cart configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required for cart commands
//! - `POCKETSHOP_STORE_URL` - Base URL of the realtime database
//!
//! ## Optional
//! - `POCKETSHOP_STORE_AUTH_TOKEN` - Token sent with every store request
//! - `POCKETSHOP_STORE_WRITE_TIMEOUT_SECS` - Write timeout (default: 10)
//! - `POCKETSHOP_CATALOG_URL` - Product API (default: <https://fakestoreapi.com>)
//! - `POCKETSHOP_DISPLAY_CURRENCY` - Display currency (default: ZAR)
//! - `POCKETSHOP_CONVERSION_RATE` - Catalog USD to display currency (default: 18.5)
//! - `POCKETSHOP_SESSION_CACHE` - Persisted sign-in flag (default: .pocketshop/session.json)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::path::PathBuf;
use std::time::Duration;

use pocketshop_core::{ConversionRate, CurrencyCode};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use url::Url;

const DEFAULT_CATALOG_URL: &str = "https://fakestoreapi.com";
const DEFAULT_CONVERSION_RATE: &str = "18.5";
const DEFAULT_SESSION_CACHE: &str = ".pocketshop/session.json";
const DEFAULT_WRITE_TIMEOUT_SECS: &str = "10";

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "xxx",
    "todo",
    "insert",
    "put-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Full application configuration.
#[derive(Debug, Clone)]
pub struct CartConfig {
    /// Realtime store connection, absent when `POCKETSHOP_STORE_URL` is unset
    pub store: Option<StoreConfig>,
    /// Product catalog API
    pub catalog: CatalogConfig,
    /// Catalog to display currency conversion
    pub conversion: ConversionRate,
    /// Where the "signed in" flag is persisted between runs
    pub session_cache_path: PathBuf,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

/// Realtime store configuration.
///
/// Implements `Debug` manually to redact the auth token.
#[derive(Clone)]
pub struct StoreConfig {
    /// Base URL of the realtime database
    pub database_url: Url,
    /// Token appended to every request as `auth=`
    pub auth_token: Option<SecretString>,
    /// Upper bound for a single write round trip
    pub write_timeout: Duration,
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("database_url", &self.database_url.as_str())
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}

/// Product catalog configuration.
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Base URL of the product API
    pub base_url: Url,
}

impl CartConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid, or
    /// if the store token looks like a placeholder.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let store = if get_optional_env("POCKETSHOP_STORE_URL").is_some() {
            Some(StoreConfig::from_env()?)
        } else {
            None
        };

        Ok(Self {
            store,
            catalog: CatalogConfig::from_env()?,
            conversion: conversion_from_env()?,
            session_cache_path: PathBuf::from(get_env_or_default(
                "POCKETSHOP_SESSION_CACHE",
                DEFAULT_SESSION_CACHE,
            )),
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }

    /// The store configuration, required by everything that touches a cart.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `POCKETSHOP_STORE_URL` was not
    /// set.
    pub fn store(&self) -> Result<&StoreConfig, ConfigError> {
        self.store
            .as_ref()
            .ok_or_else(|| ConfigError::MissingEnvVar("POCKETSHOP_STORE_URL".to_string()))
    }
}

impl StoreConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let database_url = parse_url(
            "POCKETSHOP_STORE_URL",
            &get_required_env("POCKETSHOP_STORE_URL")?,
        )?;
        let auth_token = get_optional_env("POCKETSHOP_STORE_AUTH_TOKEN")
            .map(|token| {
                validate_secret(&token, "POCKETSHOP_STORE_AUTH_TOKEN")?;
                Ok(SecretString::from(token))
            })
            .transpose()?;
        let write_timeout = get_env_or_default(
            "POCKETSHOP_STORE_WRITE_TIMEOUT_SECS",
            DEFAULT_WRITE_TIMEOUT_SECS,
        )
        .parse::<u64>()
        .map_err(|e| {
            ConfigError::InvalidEnvVar(
                "POCKETSHOP_STORE_WRITE_TIMEOUT_SECS".to_string(),
                e.to_string(),
            )
        })?;

        Ok(Self {
            database_url,
            auth_token,
            write_timeout: Duration::from_secs(write_timeout),
        })
    }

    /// Whether requests will carry an auth token.
    #[must_use]
    pub fn has_auth_token(&self) -> bool {
        self.auth_token
            .as_ref()
            .is_some_and(|t| !t.expose_secret().is_empty())
    }
}

impl CatalogConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: parse_url(
                "POCKETSHOP_CATALOG_URL",
                &get_env_or_default("POCKETSHOP_CATALOG_URL", DEFAULT_CATALOG_URL),
            )?,
        })
    }
}

fn conversion_from_env() -> Result<ConversionRate, ConfigError> {
    let currency = get_env_or_default("POCKETSHOP_DISPLAY_CURRENCY", "ZAR")
        .parse::<CurrencyCode>()
        .map_err(|e| {
            ConfigError::InvalidEnvVar("POCKETSHOP_DISPLAY_CURRENCY".to_string(), e.to_string())
        })?;
    let rate = get_env_or_default("POCKETSHOP_CONVERSION_RATE", DEFAULT_CONVERSION_RATE);
    parse_conversion(currency, &rate)
}

/// Build the catalog-to-display rate from a decimal string.
fn parse_conversion(currency: CurrencyCode, rate: &str) -> Result<ConversionRate, ConfigError> {
    let invalid =
        |msg: String| ConfigError::InvalidEnvVar("POCKETSHOP_CONVERSION_RATE".to_string(), msg);
    let rate = rate
        .trim()
        .parse::<Decimal>()
        .map_err(|e| invalid(e.to_string()))?;
    ConversionRate::new(CurrencyCode::USD, currency, rate).map_err(|e| invalid(e.to_string()))
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable. Empty values count as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    get_optional_env(key).unwrap_or_else(|| default.to_string())
}

fn parse_url(key: &str, value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }
    Ok(url)
}

/// Reject tokens that are obviously copied from documentation.
fn validate_secret(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();
    if let Some(pattern) = PLACEHOLDER_PATTERNS.iter().find(|p| lower.contains(*p)) {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!("appears to be a placeholder (contains '{pattern}')"),
        ));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_conversion_default() {
        let rate = parse_conversion(CurrencyCode::ZAR, DEFAULT_CONVERSION_RATE).unwrap();
        assert_eq!(rate.rate(), "18.5".parse::<Decimal>().unwrap());
        assert_eq!(rate.from_currency(), CurrencyCode::USD);
        assert_eq!(rate.to_currency(), CurrencyCode::ZAR);
    }

    #[test]
    fn test_parse_conversion_rejects_zero_and_garbage() {
        assert!(matches!(
            parse_conversion(CurrencyCode::ZAR, "0"),
            Err(ConfigError::InvalidEnvVar(_, _))
        ));
        assert!(parse_conversion(CurrencyCode::ZAR, "-2").is_err());
        assert!(parse_conversion(CurrencyCode::ZAR, "eighteen").is_err());
    }

    #[test]
    fn test_validate_secret_placeholder() {
        let result = validate_secret("your-database-secret", "TEST_VAR");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
        assert!(validate_secret("CHANGEME", "TEST_VAR").is_err());
    }

    #[test]
    fn test_validate_secret_valid() {
        assert!(validate_secret("eyJhbGciOiJSUzI1NiIsImtpZCI6IjFk", "TEST_VAR").is_ok());
    }

    #[test]
    fn test_parse_url_requires_http() {
        assert!(parse_url("X", "https://shop-default-rtdb.firebaseio.com").is_ok());
        assert!(matches!(
            parse_url("X", "ftp://example.org"),
            Err(ConfigError::InvalidEnvVar(_, _))
        ));
        assert!(parse_url("X", "not a url").is_err());
    }

    #[test]
    fn test_store_config_debug_redacts_token() {
        let config = StoreConfig {
            database_url: Url::parse("https://shop-default-rtdb.firebaseio.com").unwrap(),
            auth_token: Some(SecretString::from("super_secret_token_value")),
            write_timeout: Duration::from_secs(10),
        };

        let debug_output = format!("{config:?}");
        assert!(debug_output.contains("shop-default-rtdb.firebaseio.com"));
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_token_value"));
        assert!(config.has_auth_token());
    }

    #[test]
    fn test_default_catalog_url_parses() {
        let url = parse_url("POCKETSHOP_CATALOG_URL", DEFAULT_CATALOG_URL).unwrap();
        assert_eq!(url.as_str(), "https://fakestoreapi.com/");
    }
}
