//! Configuration management for the gift registry.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Call `dotenvy::dotenv()` first to pick up a local `.env` file.

use gift_registry_core::catalog::CatalogQuery;
use gift_registry_core::item::GiftItem;
use gift_registry_runtime::retry::RetryPolicy;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::session::SessionSettings;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A setting has an unusable value
    #[error("Invalid setting {name}: {reason}")]
    Invalid {
        /// Variable name
        name: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// The seed catalog could not be read
    #[error("Failed to read catalog file {path}: {source}")]
    CatalogRead {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// The seed catalog is not valid JSON
    #[error("Failed to parse catalog file {path}: {source}")]
    CatalogParse {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: serde_json::Error,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Store collection holding the gift records
    pub collection: String,
    /// File holding this device's client identity
    pub identity_path: PathBuf,
    /// JSON file seeding the in-memory catalog (empty catalog when unset)
    pub catalog_path: Option<PathBuf>,
    /// Transaction attempts before a record counts as contended (at least 1)
    pub tx_max_attempts: usize,
    /// Delay before the first transaction retry, in milliseconds
    pub tx_retry_delay_ms: u64,
    /// How long a save waits for its commit pass, in seconds
    pub save_timeout_secs: u64,
    /// Install the Prometheus recorder
    pub metrics_enabled: bool,
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    lookup(name).and_then(|value| value.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            collection: "gifts".to_string(),
            identity_path: PathBuf::from(".gift-registry/client-id"),
            catalog_path: None,
            tx_max_attempts: 5,
            tx_retry_delay_ms: 10,
            save_timeout_secs: 30,
            metrics_enabled: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through `lookup`; unset or unparsable values fall
    /// back to their defaults.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            collection: lookup("GIFT_REGISTRY_COLLECTION")
                .filter(|value| !value.trim().is_empty())
                .unwrap_or(defaults.collection),
            identity_path: lookup("GIFT_REGISTRY_IDENTITY_PATH")
                .filter(|value| !value.trim().is_empty())
                .map_or(defaults.identity_path, PathBuf::from),
            catalog_path: lookup("GIFT_REGISTRY_CATALOG_PATH")
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from),
            tx_max_attempts: parse_var(&lookup, "GIFT_REGISTRY_TX_MAX_ATTEMPTS")
                .unwrap_or(defaults.tx_max_attempts)
                .max(1),
            tx_retry_delay_ms: parse_var(&lookup, "GIFT_REGISTRY_TX_RETRY_DELAY_MS")
                .unwrap_or(defaults.tx_retry_delay_ms),
            save_timeout_secs: parse_var(&lookup, "GIFT_REGISTRY_SAVE_TIMEOUT_SECS")
                .unwrap_or(defaults.save_timeout_secs),
            metrics_enabled: parse_var(&lookup, "GIFT_REGISTRY_METRICS_ENABLED")
                .unwrap_or(defaults.metrics_enabled),
        }
    }

    /// Check settings that have no sensible fallback.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a collection name containing `/`
    /// or a zero save timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collection.contains('/') {
            return Err(ConfigError::Invalid {
                name: "GIFT_REGISTRY_COLLECTION",
                reason: format!("'{}' must not contain '/'", self.collection),
            });
        }

        if self.save_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "GIFT_REGISTRY_SAVE_TIMEOUT_SECS",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }

    /// Retry policy for catalog transactions.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(self.tx_max_attempts.saturating_sub(1))
            .initial_delay(Duration::from_millis(self.tx_retry_delay_ms))
            .build()
    }

    /// Session settings derived from this configuration.
    #[must_use]
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            query: CatalogQuery::by_order(),
            save_timeout: Duration::from_secs(self.save_timeout_secs),
            ..SessionSettings::default()
        }
    }

    /// Items of the seed catalog, or none when no file is configured.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::CatalogRead`] or [`ConfigError::CatalogParse`]
    /// when the configured file cannot be used.
    pub fn load_catalog(&self) -> Result<Vec<GiftItem>, ConfigError> {
        match &self.catalog_path {
            Some(path) => read_catalog(path),
            None => Ok(Vec::new()),
        }
    }
}

fn read_catalog(path: &Path) -> Result<Vec<GiftItem>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::CatalogRead {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_str(&raw).map_err(|source| ConfigError::CatalogParse {
        path: path.to_path_buf(),
        source,
    })
}
