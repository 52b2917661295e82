//! # Queue Pool
//!
//! Single-flight pooling of backend clients, message senders and queue
//! references keyed by queue name.
//!
//! This library provides:
//! - A retry-on-failure, memoize-on-success lazy cell, in blocking and async
//!   flavours
//! - A concurrent keyed cache of such cells where distinct keys never block
//!   each other
//! - A shared client provider that builds the backend client once
//! - Per-name sender and queue factories, the latter running idempotent
//!   provisioning at most once per name
//! - Service Bus, storage queue and in-memory backends
//!
//! ## Module Organization
//!
//! - [`cell`] - Lazy cells with retry-on-failure semantics
//! - [`keyed_cache`] - Concurrent key-to-cell map
//! - [`client_provider`] - Lazily constructed backend client
//! - [`factory`] - Per-name sender and queue factories
//! - [`providers`] - Backend collaborators
//! - [`config`] - Messaging configuration loading
//! - [`error`] - Error types for all pool operations
//! - [`validation`] - Argument checks
//!
//! ## Example
//!
//! ```rust
//! use queue_pool::providers::InMemoryClientFactory;
//! use queue_pool::{ClientProvider, QueueFactory};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), queue_pool::PoolError> {
//! let backend = InMemoryClientFactory::new();
//! let clients = Arc::new(ClientProvider::from_factory(backend.clone()));
//! let queues = QueueFactory::new(clients);
//!
//! let first = queues.get_queue("orders").await?;
//! let second = queues.get_queue("orders").await?;
//!
//! assert!(Arc::ptr_eq(&first, &second));
//! assert_eq!(backend.stats().provision_calls, 1);
//! # Ok(())
//! # }
//! ```

// Module declarations
pub mod cell;
pub mod client_provider;
pub mod config;
pub mod error;
pub mod factory;
pub mod keyed_cache;
pub mod providers;
pub mod validation;

// Re-export commonly used types at crate root for convenience
pub use cell::{AsyncLazyCell, LazyCell};
pub use client_provider::{ClientFactory, ClientProvider};
pub use config::MessagingConfig;
pub use error::{ConfigurationError, ConstructionError, PoolError, ValidationError};
pub use factory::{
    with_timeout, ProvisionQueue, QueueClient, QueueFactory, SenderClient, SenderFactory,
};
pub use keyed_cache::KeyedLazyCache;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
