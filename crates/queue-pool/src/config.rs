//! Messaging configuration consumed by the backend client factories.
//!
//! Sources, later overriding earlier:
//!
//! 1. `config/messaging.{yaml,toml,json}` in the working directory, if present
//! 2. An explicit file passed to [`MessagingConfig::load`]
//! 3. Environment variables prefixed `QP__`, for example
//!    `QP__STORAGE_ACCOUNT_NAME=devstore`
//!
//! Every field is optional here. The client factories check the fields they
//! need when they build a client, so a broken setting surfaces as a
//! [`ConfigurationError`] from the first `get_*` call rather than at load time.

use crate::error::ConfigurationError;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "QP";

const DEFAULT_FILE: &str = "config/messaging";

/// Connection settings for the Service Bus and storage queue backends
#[derive(Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct MessagingConfig {
    /// Service Bus connection string used to create senders
    pub service_bus_connection_string: Option<String>,

    /// Queue partners dispatch messages to
    pub service_bus_partner_dispatch_queue_name: Option<String>,

    /// Storage account connection string used for storage queues
    pub storage_connection_string: Option<String>,

    /// Storage account name used for request signing
    pub storage_account_name: Option<String>,

    /// Base64 storage account key used for request signing
    pub storage_account_key: Option<String>,

    /// Age in seconds after which a message is considered stale
    pub message_considered_stale_after: f64,

    /// Per-request timeout for backend HTTP calls
    pub request_timeout_seconds: u64,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            service_bus_connection_string: None,
            service_bus_partner_dispatch_queue_name: None,
            storage_connection_string: None,
            storage_account_name: None,
            storage_account_key: None,
            message_considered_stale_after: 300.0,
            request_timeout_seconds: 30,
        }
    }
}

impl MessagingConfig {
    /// Load configuration from the default file, `path` and `QP__` variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Loading`] if `path` is given but missing,
    /// a file is malformed, or a value has the wrong type.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    /// Same as [`load`](Self::load) with a custom environment prefix
    pub fn load_with_prefix(path: Option<&Path>, prefix: &str) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name(DEFAULT_FILE).required(false));

        if let Some(path) = path {
            debug!(path = %path.display(), "Loading messaging configuration file");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let loaded = builder
            .add_source(config::Environment::with_prefix(prefix).separator("__"))
            .build()
            .map_err(|e| ConfigurationError::Loading {
                message: e.to_string(),
            })?;

        loaded
            .try_deserialize()
            .map_err(|e| ConfigurationError::Loading {
                message: e.to_string(),
            })
    }

    /// Staleness threshold as a duration. Negative or non-finite values
    /// count as zero.
    pub fn stale_after(&self) -> Duration {
        Duration::try_from_secs_f64(self.message_considered_stale_after).unwrap_or(Duration::ZERO)
    }

    /// Per-request timeout as a duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Return the value of a required setting.
///
/// # Errors
///
/// Returns [`ConfigurationError::Missing`] naming `field` when the setting is
/// absent or empty.
pub fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str, ConfigurationError> {
    match value.as_deref() {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ConfigurationError::Missing {
            field: field.to_string(),
        }),
    }
}

fn redact(value: &Option<String>) -> &'static str {
    match value.as_deref() {
        Some(v) if !v.is_empty() => "<REDACTED>",
        _ => "<unset>",
    }
}

impl fmt::Debug for MessagingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagingConfig")
            .field(
                "service_bus_connection_string",
                &redact(&self.service_bus_connection_string),
            )
            .field(
                "service_bus_partner_dispatch_queue_name",
                &self.service_bus_partner_dispatch_queue_name,
            )
            .field(
                "storage_connection_string",
                &redact(&self.storage_connection_string),
            )
            .field("storage_account_name", &self.storage_account_name)
            .field("storage_account_key", &redact(&self.storage_account_key))
            .field(
                "message_considered_stale_after",
                &self.message_considered_stale_after,
            )
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .finish()
    }
}
