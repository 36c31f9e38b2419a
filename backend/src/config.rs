//! Worker configuration loaded via OrthoConfig.
//!
//! Values come from CLI flags, `DEVICES_*` environment variables and an
//! optional configuration file, in that order of precedence.

use std::time::Duration;

use ortho_config::OrthoConfig;
use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;

use crate::outbound::persistence::PoolConfig;

const DEFAULT_AUTOPI_API_URL: &str = "https://api.dimo.autopi.io/";
const DEFAULT_AUTOPI_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_CONSUMER_GROUP: &str = "devices-api";
const DEFAULT_BUS_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_BUS_BATCH_SIZE: i64 = 100;
const DEFAULT_POOL_MAX_SIZE: u32 = 10;

/// Invalid or missing settings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{field} is invalid: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

/// Settings for the telematics worker.
#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "DEVICES")]
pub struct WorkerSettings {
    /// PostgreSQL connection string.
    pub database_url: Option<String>,
    #[ortho_config(default = 10)]
    pub database_max_connections: u32,
    pub autopi_api_url: Option<String>,
    pub autopi_api_key: Option<String>,
    #[ortho_config(default = 30)]
    pub autopi_timeout_secs: u64,
    /// Base64 32-byte key sealing tokens at rest.
    pub credential_key: Option<String>,
    /// Base64 32-byte key sealing tokens handed to pollers. Falls back to
    /// `credential_key`.
    pub task_credential_key: Option<String>,
    #[ortho_config(default = 300)]
    pub integration_cache_ttl_secs: u64,
    pub consumer_group: Option<String>,
    #[ortho_config(default = 500)]
    pub bus_poll_interval_ms: u64,
    #[ortho_config(default = 100)]
    pub bus_batch_size: i64,
    pub smartcar_integration_name: Option<String>,
    pub tesla_integration_name: Option<String>,
    pub autopi_integration_name: Option<String>,
}

impl WorkerSettings {
    /// # Errors
    ///
    /// Returns [`SettingsError::Missing`] when no URL is configured.
    pub fn database_url(&self) -> Result<&str, SettingsError> {
        non_blank(self.database_url.as_deref()).ok_or(SettingsError::Missing("database_url"))
    }

    /// Pool settings for [`crate::outbound::persistence::DbPool`].
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Missing`] when no URL is configured.
    pub fn pool_config(&self) -> Result<PoolConfig, SettingsError> {
        let max_size = if self.database_max_connections == 0 {
            DEFAULT_POOL_MAX_SIZE
        } else {
            self.database_max_connections
        };
        Ok(PoolConfig::new(self.database_url()?).with_max_size(max_size))
    }

    /// # Errors
    ///
    /// Returns [`SettingsError::Invalid`] when the URL does not parse.
    pub fn autopi_api_url(&self) -> Result<Url, SettingsError> {
        let raw = non_blank(self.autopi_api_url.as_deref()).unwrap_or(DEFAULT_AUTOPI_API_URL);
        Url::parse(raw).map_err(|err| SettingsError::Invalid {
            field: "autopi_api_url",
            message: err.to_string(),
        })
    }

    /// # Errors
    ///
    /// Returns [`SettingsError::Missing`] when no key is configured.
    pub fn autopi_api_key(&self) -> Result<&str, SettingsError> {
        non_blank(self.autopi_api_key.as_deref()).ok_or(SettingsError::Missing("autopi_api_key"))
    }

    pub fn autopi_timeout(&self) -> Duration {
        Duration::from_secs(positive_or(self.autopi_timeout_secs, DEFAULT_AUTOPI_TIMEOUT_SECS))
    }

    /// # Errors
    ///
    /// Returns [`SettingsError::Missing`] when no key is configured.
    pub fn credential_key(&self) -> Result<&str, SettingsError> {
        non_blank(self.credential_key.as_deref()).ok_or(SettingsError::Missing("credential_key"))
    }

    /// # Errors
    ///
    /// Returns [`SettingsError::Missing`] when neither key is configured.
    pub fn task_credential_key(&self) -> Result<&str, SettingsError> {
        match non_blank(self.task_credential_key.as_deref()) {
            Some(key) => Ok(key),
            None => self.credential_key(),
        }
    }

    pub fn integration_cache_ttl(&self) -> Duration {
        Duration::from_secs(positive_or(
            self.integration_cache_ttl_secs,
            DEFAULT_CACHE_TTL_SECS,
        ))
    }

    pub fn consumer_group(&self) -> &str {
        non_blank(self.consumer_group.as_deref()).unwrap_or(DEFAULT_CONSUMER_GROUP)
    }

    pub fn bus_poll_interval(&self) -> Duration {
        Duration::from_millis(positive_or(
            self.bus_poll_interval_ms,
            DEFAULT_BUS_POLL_INTERVAL_MS,
        ))
    }

    pub fn bus_batch_size(&self) -> i64 {
        if self.bus_batch_size > 0 {
            self.bus_batch_size
        } else {
            DEFAULT_BUS_BATCH_SIZE
        }
    }

    /// Vendor names as stored in the integrations table.
    pub fn vendor_names(&self) -> [&str; 3] {
        [
            non_blank(self.smartcar_integration_name.as_deref()).unwrap_or("SmartCar"),
            non_blank(self.tesla_integration_name.as_deref()).unwrap_or("Tesla"),
            non_blank(self.autopi_integration_name.as_deref()).unwrap_or("AutoPi"),
        ]
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn positive_or(value: u64, fallback: u64) -> u64 {
    if value == 0 { fallback } else { value }
}
