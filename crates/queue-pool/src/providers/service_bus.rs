//! Service Bus senders over the REST endpoint.
//!
//! [`ServiceBusClientFactory`] turns the `service_bus_connection_string`
//! setting into a [`ServiceBusClient`]. Each [`ServiceBusSender`] targets
//! one queue and authenticates every send with a shared access signature
//! derived from the connection string's key.
//!
//! ## Example
//!
//! ```no_run
//! use queue_pool::config::MessagingConfig;
//! use queue_pool::providers::{ServiceBusClientFactory, ServiceBusMessage};
//! use queue_pool::{ClientProvider, SenderFactory};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), queue_pool::PoolError> {
//! let config = MessagingConfig::load(None)?;
//! let clients = Arc::new(ClientProvider::from_factory(ServiceBusClientFactory::new(config)));
//! let senders = SenderFactory::new(clients);
//!
//! let sender = senders.get_sender("partner-dispatch")?;
//! sender
//!     .send(&ServiceBusMessage::new("payload").with_message_id("42"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

use super::{build_http_client, hmac_sha256, status_error, transport_error, ConnectionString};
use crate::client_provider::ClientFactory;
use crate::config::{required, MessagingConfig};
use crate::error::{ConfigurationError, PoolError, ValidationError};
use crate::factory::SenderClient;
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use chrono::Utc;
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;
use uuid::Uuid;

#[cfg(test)]
#[path = "service_bus_tests.rs"]
mod tests;

const PROVIDER: &str = "ServiceBus";
const CONNECTION_STRING_FIELD: &str = "service_bus_connection_string";

/// Lifetime of the signature attached to each send
const TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

// ============================================================================
// Message Builder
// ============================================================================

/// Message sent through a [`ServiceBusSender`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceBusMessage {
    message_id: Option<String>,
    body: Bytes,
    content_type: Option<String>,
    properties: Vec<(String, serde_json::Value)>,
}

impl ServiceBusMessage {
    /// Start a message with `body`
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    /// Set the broker message id
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Replace the body
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Add a user property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.push((key.into(), value.into()));
        self
    }

    /// Set the content type
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Use the name of `T` as the content type
    pub fn with_content_type_of<T: ?Sized>(self) -> Self {
        self.with_content_type(std::any::type_name::<T>())
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// User properties in insertion order
    pub fn properties(&self) -> &[(String, serde_json::Value)] {
        &self.properties
    }

    fn broker_properties(&self) -> String {
        match &self.message_id {
            Some(id) => serde_json::json!({ "MessageId": id }).to_string(),
            None => "{}".to_string(),
        }
    }
}

// ============================================================================
// Client Factory
// ============================================================================

/// Builds [`ServiceBusClient`]s from [`MessagingConfig`]
#[derive(Debug, Clone)]
pub struct ServiceBusClientFactory {
    config: MessagingConfig,
}

impl ServiceBusClientFactory {
    pub fn new(config: MessagingConfig) -> Self {
        Self { config }
    }

    /// Queue partners dispatch to, if configured
    pub fn partner_dispatch_queue(&self) -> Option<&str> {
        self.config
            .service_bus_partner_dispatch_queue_name
            .as_deref()
            .filter(|name| !name.is_empty())
    }
}

impl ClientFactory for ServiceBusClientFactory {
    type Client = ServiceBusClient;

    fn create_client(&self) -> Result<ServiceBusClient, PoolError> {
        let raw = required(&self.config.service_bus_connection_string, CONNECTION_STRING_FIELD)?;
        let settings = ConnectionString::parse(raw, CONNECTION_STRING_FIELD)?;

        let endpoint = parse_endpoint(settings.require("Endpoint", CONNECTION_STRING_FIELD)?)?;
        let key_name = settings
            .require("SharedAccessKeyName", CONNECTION_STRING_FIELD)?
            .to_string();
        let key = settings
            .require("SharedAccessKey", CONNECTION_STRING_FIELD)?
            .to_string();
        let entity_path = settings.get("EntityPath").map(str::to_string);

        debug!(endpoint = %endpoint, key_name = %key_name, "Parsed Service Bus connection string");

        Ok(ServiceBusClient {
            connection: Arc::new(Connection {
                endpoint,
                key_name,
                key,
                http: build_http_client(self.config.request_timeout())?,
            }),
            entity_path,
        })
    }
}

/// Accept `sb://` endpoints as HTTPS and plain HTTP(S) endpoints as given
fn parse_endpoint(raw: &str) -> Result<Url, ConfigurationError> {
    let normalized = match raw.strip_prefix("sb://") {
        Some(rest) => format!("https://{}", rest),
        None => raw.to_string(),
    };

    let invalid = |message: String| ConfigurationError::Invalid {
        field: CONNECTION_STRING_FIELD.to_string(),
        message,
    };

    let mut url = Url::parse(&normalized).map_err(|e| invalid(format!("bad Endpoint: {}", e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported Endpoint scheme '{}'", url.scheme())));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

// ============================================================================
// Client and Sender
// ============================================================================

struct Connection {
    endpoint: Url,
    key_name: String,
    key: String,
    http: reqwest::Client,
}

/// Connection to one Service Bus namespace
pub struct ServiceBusClient {
    connection: Arc<Connection>,
    entity_path: Option<String>,
}

impl ServiceBusClient {
    /// Namespace endpoint, always ending in `/`
    pub fn endpoint(&self) -> &Url {
        &self.connection.endpoint
    }

    /// Entity the connection string is scoped to, if any. Senders can only be
    /// created for this name.
    pub fn entity_path(&self) -> Option<&str> {
        self.entity_path.as_deref()
    }
}

impl fmt::Debug for ServiceBusClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBusClient")
            .field("endpoint", &self.connection.endpoint.as_str())
            .field("key_name", &self.connection.key_name)
            .field("entity_path", &self.entity_path)
            .finish()
    }
}

impl SenderClient for ServiceBusClient {
    type Sender = ServiceBusSender;

    fn create_sender(&self, name: &str) -> Result<ServiceBusSender, PoolError> {
        // A connection string with EntityPath only grants access to that entity.
        if let Some(entity) = self.entity_path.as_deref() {
            if entity != name {
                return Err(ValidationError::Invalid {
                    param: "name".to_string(),
                    message: format!("connection string is scoped to entity '{}'", entity),
                }
                .into());
            }
        }

        let invalid = |e: url::ParseError| {
            PoolError::from(ValidationError::Invalid {
                param: "name".to_string(),
                message: e.to_string(),
            })
        };

        let encoded = urlencoding::encode(name);
        let resource = self.connection.endpoint.join(&encoded).map_err(invalid)?;
        let messages_url = self
            .connection
            .endpoint
            .join(&format!("{}/messages", encoded))
            .map_err(invalid)?;

        Ok(ServiceBusSender {
            path: name.to_string(),
            client_id: Uuid::new_v4(),
            resource,
            messages_url,
            connection: Arc::clone(&self.connection),
        })
    }
}

/// Sender bound to a single queue
pub struct ServiceBusSender {
    path: String,
    client_id: Uuid,
    resource: Url,
    messages_url: Url,
    connection: Arc<Connection>,
}

impl ServiceBusSender {
    /// Queue this sender targets
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Identifier of this sender instance
    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    /// Shared access signature valid for `ttl` from now
    pub fn sas_token(&self, ttl: Duration) -> Result<String, PoolError> {
        let expiry = Utc::now().timestamp() + i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX / 2);
        self.sas_token_expiring_at(expiry)
    }

    fn sas_token_expiring_at(&self, expiry: i64) -> Result<String, PoolError> {
        let resource = urlencoding::encode(self.resource.as_str());
        let string_to_sign = format!("{}\n{}", resource, expiry);
        let signature = STANDARD.encode(hmac_sha256(
            self.connection.key.as_bytes(),
            string_to_sign.as_bytes(),
        )?);

        Ok(format!(
            "SharedAccessSignature sr={}&sig={}&se={}&skn={}",
            resource,
            urlencoding::encode(&signature),
            expiry,
            self.connection.key_name
        ))
    }

    /// Send `message` to this sender's queue.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::Invalid`] if a property cannot be sent as a header
    /// - `AuthenticationFailed` for 401 and 403 responses
    /// - `Provider` for other unsuccessful statuses
    /// - `ConnectionFailed` for transport failures
    pub async fn send(&self, message: &ServiceBusMessage) -> Result<(), PoolError> {
        let token = self.sas_token(TOKEN_TTL)?;

        let mut request = self
            .connection
            .http
            .post(self.messages_url.clone())
            .header(AUTHORIZATION, token)
            .header("BrokerProperties", message.broker_properties())
            .body(message.body.clone());

        if let Some(content_type) = &message.content_type {
            request = request.header(CONTENT_TYPE, header_value("content_type", content_type)?);
        }
        for (key, value) in &message.properties {
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                PoolError::from(ValidationError::Invalid {
                    param: format!("property {}", key),
                    message: e.to_string(),
                })
            })?;
            request = request.header(name, header_value(key, &value.to_string())?);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            debug!(queue = %self.path, message_id = ?message.message_id, "Message sent");
            return Ok(());
        }

        let code = status.canonical_reason().unwrap_or("Unknown").to_string();
        let body = response.text().await.unwrap_or_default();
        Err(status_error(PROVIDER, status.as_u16(), code, body))
    }
}

fn header_value(param: &str, value: &str) -> Result<HeaderValue, PoolError> {
    HeaderValue::from_str(value).map_err(|e| {
        ValidationError::Invalid {
            param: param.to_string(),
            message: e.to_string(),
        }
        .into()
    })
}

impl fmt::Debug for ServiceBusSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBusSender")
            .field("path", &self.path)
            .field("client_id", &self.client_id)
            .finish()
    }
}
