//! Backend collaborators for the pooled factories.
//!
//! - [`service_bus`]: Service Bus senders over the REST endpoint
//! - [`storage_queue`]: storage queue references with provisioning
//! - [`memory`]: in-process backend for tests and local development
//!
//! The HTTP backends share the helpers below for connection strings, request
//! signing and error mapping.

use crate::error::{ConfigurationError, ConstructionError, PoolError};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use std::time::Duration;

pub mod memory;
pub mod service_bus;
pub mod storage_queue;

pub use memory::{InMemoryClient, InMemoryClientFactory, InMemoryQueue, InMemorySender};
pub use service_bus::{ServiceBusClient, ServiceBusClientFactory, ServiceBusMessage, ServiceBusSender};
pub use storage_queue::{QueueServiceClient, StorageQueue, StorageQueueClientFactory};

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;

type HmacSha256 = Hmac<Sha256>;

/// `Key=Value;Key=Value` settings with case-insensitive keys.
///
/// Values keep any `=` after the first one, so base64 keys survive.
#[derive(Debug, Clone, Default)]
pub(crate) struct ConnectionString {
    settings: HashMap<String, String>,
}

impl ConnectionString {
    /// Parse `raw`, reporting problems against `field`
    pub(crate) fn parse(raw: &str, field: &str) -> Result<Self, ConfigurationError> {
        let mut settings = HashMap::new();
        for part in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((key, value)) = part.split_once('=') else {
                return Err(ConfigurationError::Invalid {
                    field: field.to_string(),
                    message: format!("expected Key=Value, found '{}'", part),
                });
            };
            settings.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }

        if settings.is_empty() {
            return Err(ConfigurationError::Invalid {
                field: field.to_string(),
                message: "no settings found".to_string(),
            });
        }
        Ok(Self { settings })
    }

    /// Look up a setting by name
    pub(crate) fn get(&self, key: &str) -> Option<&str> {
        self.settings
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Look up a setting that must be present
    pub(crate) fn require(&self, key: &str, field: &str) -> Result<&str, ConfigurationError> {
        self.get(key).ok_or_else(|| ConfigurationError::Invalid {
            field: field.to_string(),
            message: format!("missing {}", key),
        })
    }
}

/// HMAC-SHA256 of `data` under `key`
pub(crate) fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, ConfigurationError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| ConfigurationError::Invalid {
        field: "signing_key".to_string(),
        message: e.to_string(),
    })?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// HTTP client shared by every resource derived from one backend client
pub(crate) fn build_http_client(timeout: Duration) -> Result<reqwest::Client, PoolError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("queue-pool/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| {
            ConstructionError::ConnectionFailed {
                message: format!("Failed to build HTTP client: {}", e),
            }
            .into()
        })
}

/// Map a transport failure to a construction error
pub(crate) fn transport_error(e: reqwest::Error) -> PoolError {
    let message = if e.is_timeout() {
        format!("Request timeout: {}", e)
    } else if e.is_connect() {
        format!("Connection failed: {}", e)
    } else {
        format!("HTTP request failed: {}", e)
    };
    ConstructionError::ConnectionFailed { message }.into()
}

/// Map an unsuccessful HTTP status to a construction error
pub(crate) fn status_error(provider: &str, status: u16, code: String, message: String) -> PoolError {
    match status {
        401 | 403 => ConstructionError::AuthenticationFailed {
            message: format!("{} ({} {})", message, status, code),
        }
        .into(),
        _ => ConstructionError::Provider {
            provider: provider.to_string(),
            status,
            code,
            message,
        }
        .into(),
    }
}
