//! In-memory backend for testing and local development.
//!
//! One [`InMemoryClientFactory`] represents one backend. Clients, senders and
//! queues derived from it share its state, and it keeps counters for every
//! construction so tests can check how often the pool reached the backend.
//! Failures can be injected for client builds and for provisioning.

use crate::client_provider::ClientFactory;
use crate::error::{ConfigurationError, ConstructionError, PoolError};
use crate::factory::{ProvisionQueue, QueueClient, SenderClient};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Shared Backend State
// ============================================================================

/// Construction counters at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InMemoryStats {
    /// Clients built by the factory
    pub client_builds: usize,
    /// Senders created by clients
    pub sender_builds: usize,
    /// Queue references derived by clients
    pub queue_references: usize,
    /// `create_if_not_exists` calls
    pub provision_calls: usize,
}

#[derive(Default)]
struct Backend {
    client_builds: AtomicUsize,
    sender_builds: AtomicUsize,
    queue_references: AtomicUsize,
    provision_calls: AtomicUsize,
    failing_client_builds: AtomicUsize,
    failing_provisions: AtomicUsize,
    provision_delay: Mutex<Duration>,
    provisioned: RwLock<HashSet<String>>,
    sent: RwLock<HashMap<String, Vec<Bytes>>>,
}

impl Backend {
    /// Consume one injected failure from `counter`, if any remain
    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Client factory over a fresh in-memory backend.
///
/// Cloning yields a handle to the same backend.
#[derive(Clone, Default)]
pub struct InMemoryClientFactory {
    backend: Arc<Backend>,
}

impl InMemoryClientFactory {
    /// Create a factory with an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` client builds fail with a configuration error
    pub fn fail_next_client_builds(&self, count: usize) {
        self.backend
            .failing_client_builds
            .store(count, Ordering::SeqCst);
    }

    /// Make the next `count` provisioning calls fail with a transient error
    pub fn fail_next_provisions(&self, count: usize) {
        self.backend.failing_provisions.store(count, Ordering::SeqCst);
    }

    /// Delay every provisioning call by `delay`
    pub fn set_provision_delay(&self, delay: Duration) {
        *self.backend.provision_delay.lock() = delay;
    }

    /// Snapshot of the construction counters
    pub fn stats(&self) -> InMemoryStats {
        let b = &self.backend;
        InMemoryStats {
            client_builds: b.client_builds.load(Ordering::SeqCst),
            sender_builds: b.sender_builds.load(Ordering::SeqCst),
            queue_references: b.queue_references.load(Ordering::SeqCst),
            provision_calls: b.provision_calls.load(Ordering::SeqCst),
        }
    }

    /// Check whether `name` has been provisioned
    pub fn queue_exists(&self, name: &str) -> bool {
        self.backend.provisioned.read().contains(name)
    }

    /// Bodies sent to `name`, oldest first
    pub fn sent_messages(&self, name: &str) -> Vec<Bytes> {
        self.backend
            .sent
            .read()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }
}

impl ClientFactory for InMemoryClientFactory {
    type Client = InMemoryClient;

    fn create_client(&self) -> Result<InMemoryClient, PoolError> {
        self.backend.client_builds.fetch_add(1, Ordering::SeqCst);
        if Backend::take_failure(&self.backend.failing_client_builds) {
            return Err(ConfigurationError::Missing {
                field: "storage_connection_string".to_string(),
            }
            .into());
        }
        Ok(InMemoryClient {
            id: Uuid::new_v4(),
            backend: Arc::clone(&self.backend),
        })
    }
}

// ============================================================================
// Client and Resources
// ============================================================================

/// Client bound to an in-memory backend
pub struct InMemoryClient {
    id: Uuid,
    backend: Arc<Backend>,
}

impl InMemoryClient {
    /// Identifier of this client instance
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl SenderClient for InMemoryClient {
    type Sender = InMemorySender;

    fn create_sender(&self, name: &str) -> Result<InMemorySender, PoolError> {
        self.backend.sender_builds.fetch_add(1, Ordering::SeqCst);
        Ok(InMemorySender {
            path: name.to_string(),
            client_id: Uuid::new_v4(),
            backend: Arc::clone(&self.backend),
        })
    }
}

impl QueueClient for InMemoryClient {
    type Queue = InMemoryQueue;

    fn queue_reference(&self, name: &str) -> Result<InMemoryQueue, PoolError> {
        self.backend.queue_references.fetch_add(1, Ordering::SeqCst);
        Ok(InMemoryQueue {
            name: name.to_string(),
            backend: Arc::clone(&self.backend),
        })
    }
}

/// Sender recording every body it sends
pub struct InMemorySender {
    path: String,
    client_id: Uuid,
    backend: Arc<Backend>,
}

impl InMemorySender {
    /// Queue this sender targets
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Identifier of this sender instance
    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    /// Record `body` as sent to this sender's queue
    pub fn send(&self, body: impl Into<Bytes>) -> Result<(), PoolError> {
        self.backend
            .sent
            .write()
            .entry(self.path.clone())
            .or_default()
            .push(body.into());
        Ok(())
    }
}

/// Queue reference in the in-memory backend
pub struct InMemoryQueue {
    name: String,
    backend: Arc<Backend>,
}

impl InMemoryQueue {
    /// Name of the queue
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl ProvisionQueue for InMemoryQueue {
    async fn create_if_not_exists(&self) -> Result<bool, PoolError> {
        self.backend.provision_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.backend.provision_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if Backend::take_failure(&self.backend.failing_provisions) {
            return Err(ConstructionError::Provider {
                provider: "InMemory".to_string(),
                status: 503,
                code: "ServerBusy".to_string(),
                message: format!("queue {} is temporarily unavailable", self.name),
            }
            .into());
        }

        Ok(self.backend.provisioned.write().insert(self.name.clone()))
    }
}

impl fmt::Debug for InMemoryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryClient").field("id", &self.id).finish()
    }
}

impl fmt::Debug for InMemorySender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemorySender")
            .field("path", &self.path)
            .field("client_id", &self.client_id)
            .finish()
    }
}

impl fmt::Debug for InMemoryQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryQueue").field("name", &self.name).finish()
    }
}
