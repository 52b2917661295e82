//! Synchronous per-name sender pool.

use super::SenderClient;
use crate::cell::LazyCell;
use crate::client_provider::ClientProvider;
use crate::error::PoolError;
use crate::keyed_cache::KeyedLazyCache;
use crate::validation::require_not_empty;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "sender_tests.rs"]
mod tests;

/// Hands out one shared sender per queue name.
///
/// The first call for a name builds its sender from the shared client; every
/// later call, from any thread, returns the same `Arc`. A failed build is
/// returned to its callers and retried by the next call for that name.
pub struct SenderFactory<C: SenderClient> {
    clients: Arc<ClientProvider<C>>,
    senders: KeyedLazyCache<String, LazyCell<Arc<C::Sender>, PoolError>>,
}

impl<C: SenderClient> SenderFactory<C> {
    /// Create a factory drawing its client from `clients`
    pub fn new(clients: Arc<ClientProvider<C>>) -> Self {
        Self {
            clients,
            senders: KeyedLazyCache::new(),
        }
    }

    /// Return the sender for `name`, building it on first use.
    ///
    /// # Errors
    ///
    /// - [`PoolError::InvalidArgument`] if `name` is empty. Checked before the
    ///   cache is touched.
    /// - The client's or the sender's construction error, unmodified.
    pub fn get_sender(&self, name: &str) -> Result<Arc<C::Sender>, PoolError> {
        let name = require_not_empty(Some(name), "name")?;

        self.senders.get_or_create(name, |key| {
            let clients = Arc::clone(&self.clients);
            let name = key.clone();
            move || -> Result<Arc<C::Sender>, PoolError> {
                debug!(queue = %name, "Creating sender");
                let client = clients.get_client()?;
                match client.create_sender(&name) {
                    Ok(sender) => {
                        info!(queue = %name, "Sender created");
                        Ok(Arc::new(sender))
                    }
                    Err(e) => {
                        warn!(queue = %name, error = %e, "Sender creation failed");
                        Err(e)
                    }
                }
            }
        })
    }

    /// Check whether a sender for `name` has already been built
    pub fn is_cached(&self, name: &str) -> bool {
        self.senders.peek(name).is_some()
    }

    /// Names that have been requested so far, built or not
    pub fn names(&self) -> Vec<String> {
        self.senders.keys()
    }

    /// The client provider shared by this factory
    pub fn client_provider(&self) -> &Arc<ClientProvider<C>> {
        &self.clients
    }
}

impl<C: SenderClient> fmt::Debug for SenderFactory<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderFactory")
            .field("clients", &self.clients)
            .field("senders", &self.senders)
            .finish()
    }
}
