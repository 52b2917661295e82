//! Lazily constructed, shared backend client.

use crate::cell::LazyCell;
use crate::error::PoolError;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

#[cfg(test)]
#[path = "client_provider_tests.rs"]
mod tests;

/// Builds the backend client from configuration.
///
/// Implementations validate their configuration on every call, so a factory
/// whose configuration is later fixed succeeds on the next attempt.
pub trait ClientFactory: Send + Sync {
    /// Client produced by this factory
    type Client: Send + Sync + 'static;

    /// Construct a new client
    fn create_client(&self) -> Result<Self::Client, PoolError>;
}

/// Holds at most one backend client, built on first use.
///
/// Construction runs at most once at a time. Once it succeeds every caller
/// receives the same `Arc`; a failed construction is reported to its callers
/// and the next call tries again.
pub struct ClientProvider<C> {
    cell: LazyCell<Arc<C>, PoolError>,
}

impl<C> ClientProvider<C>
where
    C: Send + Sync + 'static,
{
    /// Create a provider over `factory`. No client is built until
    /// [`get_client`](Self::get_client) is called.
    pub fn new(factory: Arc<dyn ClientFactory<Client = C>>) -> Self {
        let cell = LazyCell::new(move || match factory.create_client() {
            Ok(client) => {
                info!(
                    client = std::any::type_name::<C>(),
                    "Backend client constructed"
                );
                Ok(Arc::new(client))
            }
            Err(e) => {
                warn!(
                    client = std::any::type_name::<C>(),
                    error = %e,
                    "Backend client construction failed"
                );
                Err(e)
            }
        });
        Self { cell }
    }

    /// Create a provider that owns `factory`
    pub fn from_factory<F>(factory: F) -> Self
    where
        F: ClientFactory<Client = C> + 'static,
    {
        Self::new(Arc::new(factory))
    }

    /// Return the shared client, constructing it if needed.
    ///
    /// # Errors
    ///
    /// Returns the factory's error unmodified, typically a
    /// [`ConfigurationError`](crate::error::ConfigurationError).
    pub fn get_client(&self) -> Result<Arc<C>, PoolError> {
        self.cell.get()
    }

    /// Check whether the client has been constructed
    pub fn is_initialized(&self) -> bool {
        self.cell.is_initialized()
    }
}

impl<C> fmt::Debug for ClientProvider<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientProvider")
            .field("cell", &self.cell)
            .finish()
    }
}
