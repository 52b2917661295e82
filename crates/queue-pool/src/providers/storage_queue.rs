//! Storage queue references with idempotent provisioning.
//!
//! [`StorageQueueClientFactory`] checks the storage settings and builds a
//! [`QueueServiceClient`] for the account's queue endpoint. Queue references
//! are cheap; only [`StorageQueue::create_if_not_exists`] talks to the
//! service, with requests signed by the account's shared key.

use super::{build_http_client, hmac_sha256, status_error, transport_error, ConnectionString};
use crate::client_provider::ClientFactory;
use crate::config::{required, MessagingConfig};
use crate::error::{ConfigurationError, PoolError, ValidationError};
use crate::factory::{ProvisionQueue, QueueClient};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH};
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use url::Url;

#[cfg(test)]
#[path = "storage_queue_tests.rs"]
mod tests;

const PROVIDER: &str = "StorageQueue";
const CONNECTION_STRING_FIELD: &str = "storage_connection_string";
const API_VERSION: &str = "2019-12-12";
const DEVELOPMENT_ENDPOINT: &str = "http://127.0.0.1:10001/devstoreaccount1/";

// ============================================================================
// Client Factory
// ============================================================================

/// Builds [`QueueServiceClient`]s from [`MessagingConfig`]
#[derive(Debug, Clone)]
pub struct StorageQueueClientFactory {
    config: MessagingConfig,
}

impl StorageQueueClientFactory {
    pub fn new(config: MessagingConfig) -> Self {
        Self { config }
    }
}

impl ClientFactory for StorageQueueClientFactory {
    type Client = QueueServiceClient;

    fn create_client(&self) -> Result<QueueServiceClient, PoolError> {
        let raw = required(&self.config.storage_connection_string, CONNECTION_STRING_FIELD)?;
        let account_name = required(&self.config.storage_account_name, "storage_account_name")?;
        let account_key = required(&self.config.storage_account_key, "storage_account_key")?;

        let endpoint = queue_endpoint(&ConnectionString::parse(raw, CONNECTION_STRING_FIELD)?)?;
        let key = STANDARD
            .decode(account_key)
            .map_err(|e| ConfigurationError::Invalid {
                field: "storage_account_key".to_string(),
                message: format!("not valid base64: {}", e),
            })?;

        debug!(endpoint = %endpoint, account = %account_name, "Resolved storage queue endpoint");

        Ok(QueueServiceClient {
            connection: Arc::new(Connection {
                endpoint,
                signer: SharedKeySigner {
                    account: account_name.to_string(),
                    key,
                },
                http: build_http_client(self.config.request_timeout())?,
            }),
        })
    }
}

/// Find the queue service endpoint named by a storage connection string
fn queue_endpoint(settings: &ConnectionString) -> Result<Url, ConfigurationError> {
    let invalid = |message: String| ConfigurationError::Invalid {
        field: CONNECTION_STRING_FIELD.to_string(),
        message,
    };

    let raw = if settings
        .get("UseDevelopmentStorage")
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    {
        DEVELOPMENT_ENDPOINT.to_string()
    } else if let Some(endpoint) = settings.get("QueueEndpoint") {
        endpoint.to_string()
    } else {
        let protocol = settings.get("DefaultEndpointsProtocol").unwrap_or("https");
        let account = settings.require("AccountName", CONNECTION_STRING_FIELD)?;
        let suffix = settings.get("EndpointSuffix").unwrap_or("core.windows.net");
        format!("{}://{}.queue.{}/", protocol, account, suffix)
    };

    let mut url = Url::parse(&raw).map_err(|e| invalid(format!("bad queue endpoint: {}", e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported protocol '{}'", url.scheme())));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Check a queue name against the service's naming rules
fn validate_queue_name(name: &str) -> Result<(), ValidationError> {
    let invalid = |message: &str| ValidationError::Invalid {
        param: "name".to_string(),
        message: format!("'{}' {}", name, message),
    };

    if !(3..=63).contains(&name.len()) {
        return Err(invalid("must be 3 to 63 characters long"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(invalid("may only contain lowercase letters, digits and hyphens"));
    }
    if name.starts_with('-') || name.ends_with('-') || name.contains("--") {
        return Err(invalid("must not start or end with a hyphen or repeat hyphens"));
    }
    Ok(())
}

// ============================================================================
// Request Signing
// ============================================================================

/// Shared Key authorization for the queue service
struct SharedKeySigner {
    account: String,
    key: Vec<u8>,
}

impl SharedKeySigner {
    /// Canonical form of a request without a body.
    ///
    /// `ms_headers` must be lowercase `x-ms-*` headers sorted by name.
    fn string_to_sign(&self, verb: &str, ms_headers: &[(&str, &str)], url: &Url) -> String {
        // Content-Encoding through Range are all empty for these requests.
        let mut canonical = format!("{}\n{}", verb, "\n".repeat(11));
        for (name, value) in ms_headers {
            canonical.push_str(&format!("{}:{}\n", name, value));
        }
        canonical.push_str(&format!("/{}{}", self.account, url.path()));
        canonical
    }

    fn authorization(
        &self,
        verb: &str,
        ms_headers: &[(&str, &str)],
        url: &Url,
    ) -> Result<String, PoolError> {
        let string_to_sign = self.string_to_sign(verb, ms_headers, url);
        let signature = STANDARD.encode(hmac_sha256(&self.key, string_to_sign.as_bytes())?);
        Ok(format!("SharedKey {}:{}", self.account, signature))
    }
}

// ============================================================================
// Client and Queue
// ============================================================================

struct Connection {
    endpoint: Url,
    signer: SharedKeySigner,
    http: reqwest::Client,
}

/// Client for one storage account's queue service
pub struct QueueServiceClient {
    connection: Arc<Connection>,
}

impl QueueServiceClient {
    /// Queue service endpoint, always ending in `/`
    pub fn endpoint(&self) -> &Url {
        &self.connection.endpoint
    }

    /// Account used to sign requests
    pub fn account_name(&self) -> &str {
        &self.connection.signer.account
    }
}

impl fmt::Debug for QueueServiceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueServiceClient")
            .field("endpoint", &self.connection.endpoint.as_str())
            .field("account", &self.connection.signer.account)
            .finish()
    }
}

impl QueueClient for QueueServiceClient {
    type Queue = StorageQueue;

    fn queue_reference(&self, name: &str) -> Result<StorageQueue, PoolError> {
        validate_queue_name(name)?;
        let url = self
            .connection
            .endpoint
            .join(name)
            .map_err(|e| ValidationError::Invalid {
                param: "name".to_string(),
                message: e.to_string(),
            })?;

        Ok(StorageQueue {
            name: name.to_string(),
            url,
            connection: Arc::clone(&self.connection),
        })
    }
}

/// Reference to a single storage queue
pub struct StorageQueue {
    name: String,
    url: Url,
    connection: Arc<Connection>,
}

impl StorageQueue {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl fmt::Debug for StorageQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageQueue")
            .field("name", &self.name)
            .field("url", &self.url.as_str())
            .finish()
    }
}

#[async_trait]
impl ProvisionQueue for StorageQueue {
    async fn create_if_not_exists(&self) -> Result<bool, PoolError> {
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let ms_headers = [("x-ms-date", date.as_str()), ("x-ms-version", API_VERSION)];
        let authorization = self
            .connection
            .signer
            .authorization("PUT", &ms_headers, &self.url)?;

        let mut request = self
            .connection
            .http
            .put(self.url.clone())
            .header(AUTHORIZATION, authorization)
            .header(CONTENT_LENGTH, "0");
        for (name, value) in ms_headers {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status().as_u16();
        let header_code = response
            .headers()
            .get("x-ms-error-code")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        match status {
            201 => {
                debug!(queue = %self.name, "Storage queue created");
                Ok(true)
            }
            204 => Ok(false),
            _ => {
                let body = response.text().await.unwrap_or_default();
                let (body_code, message) = parse_error_body(&body);
                let code = header_code.or(body_code).unwrap_or_else(|| "Unknown".to_string());

                // Conflict means the queue exists, unless it is being deleted.
                if status == 409 && code != "QueueBeingDeleted" {
                    debug!(queue = %self.name, code = %code, "Storage queue already exists");
                    return Ok(false);
                }
                Err(status_error(PROVIDER, status, code, message.unwrap_or(body)))
            }
        }
    }
}

/// Extract `Code` and `Message` from a storage error document
fn parse_error_body(xml: &str) -> (Option<String>, Option<String>) {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut code = None;
    let mut message = None;
    let mut current: Option<Vec<u8>> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => current = Some(e.name().as_ref().to_vec()),
            Ok(Event::Text(e)) => {
                let text = e.unescape().map(|s| s.into_owned()).ok();
                match current.as_deref() {
                    Some(b"Code") => code = text,
                    Some(b"Message") => message = text,
                    _ => {}
                }
            }
            Ok(Event::End(_)) => current = None,
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    (code, message)
}
