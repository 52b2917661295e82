//! Asynchronous per-name queue pool with provisioning.

use super::{ProvisionQueue, QueueClient};
use crate::cell::AsyncLazyCell;
use crate::client_provider::ClientProvider;
use crate::error::PoolError;
use crate::keyed_cache::KeyedLazyCache;
use crate::validation::require_not_empty;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;

/// Hands out one provisioned queue reference per queue name.
///
/// The first call for a name derives the reference from the shared client
/// and runs `create_if_not_exists` on it. Concurrent callers for that name
/// await the same attempt, so provisioning runs once however wide the
/// fan-out. Distinct names provision concurrently.
pub struct QueueFactory<C: QueueClient> {
    clients: Arc<ClientProvider<C>>,
    queues: KeyedLazyCache<String, AsyncLazyCell<Arc<C::Queue>, PoolError>>,
}

impl<C: QueueClient> QueueFactory<C> {
    /// Create a factory drawing its client from `clients`
    pub fn new(clients: Arc<ClientProvider<C>>) -> Self {
        Self {
            clients,
            queues: KeyedLazyCache::new(),
        }
    }

    /// Return the queue for `name`, provisioning it on first use.
    ///
    /// Resolution implies the remote queue exists.
    ///
    /// # Errors
    ///
    /// - [`PoolError::InvalidArgument`] if `name` is empty. Checked before the
    ///   cache is touched.
    /// - The client's construction error or the provisioning error,
    ///   unmodified.
    pub async fn get_queue(&self, name: &str) -> Result<Arc<C::Queue>, PoolError> {
        let name = require_not_empty(Some(name), "name")?;

        self.queues
            .get_or_create(name, |key| {
                let clients = Arc::clone(&self.clients);
                let name = key.clone();
                move || provision(Arc::clone(&clients), name.clone())
            })
            .await
    }

    /// Check whether the queue for `name` has already been provisioned
    pub fn is_cached(&self, name: &str) -> bool {
        self.queues.peek(name).is_some()
    }

    /// Names that have been requested so far, provisioned or not
    pub fn names(&self) -> Vec<String> {
        self.queues.keys()
    }

    /// The client provider shared by this factory
    pub fn client_provider(&self) -> &Arc<ClientProvider<C>> {
        &self.clients
    }
}

async fn provision<C: QueueClient>(
    clients: Arc<ClientProvider<C>>,
    name: String,
) -> Result<Arc<C::Queue>, PoolError> {
    debug!(queue = %name, "Provisioning queue");

    // Client construction is synchronous and short; it never awaits.
    let client = clients.get_client()?;
    let queue = client.queue_reference(&name)?;

    match queue.create_if_not_exists().await {
        Ok(created) => {
            info!(queue = %name, created, "Queue ready");
            Ok(Arc::new(queue))
        }
        Err(e) => {
            warn!(queue = %name, error = %e, "Queue provisioning failed");
            Err(e)
        }
    }
}

impl<C: QueueClient> fmt::Debug for QueueFactory<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueFactory")
            .field("clients", &self.clients)
            .field("queues", &self.queues)
            .finish()
    }
}
