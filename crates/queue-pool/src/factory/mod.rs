//! Name-keyed factories over a shared backend client.
//!
//! [`SenderFactory`] hands out one sender per queue name from a synchronous
//! collaborator. [`QueueFactory`] hands out one provisioned queue reference
//! per name, running the asynchronous `create_if_not_exists` call at most
//! once per name. Both share a single [`ClientProvider`](crate::ClientProvider)
//! so the backend client is built once for the whole process.

use crate::error::PoolError;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

mod queue;
mod sender;

pub use queue::QueueFactory;
pub use sender::SenderFactory;

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;

/// Backend client able to create message senders for a queue name
pub trait SenderClient: Send + Sync + 'static {
    /// Sender bound to a single queue
    type Sender: Send + Sync + 'static;

    /// Create a sender for `name`
    fn create_sender(&self, name: &str) -> Result<Self::Sender, PoolError>;
}

/// Backend client able to produce queue references for a queue name
pub trait QueueClient: Send + Sync + 'static {
    /// Queue reference bound to a single queue
    type Queue: ProvisionQueue + 'static;

    /// Derive the reference for `name`. Does not contact the backend.
    fn queue_reference(&self, name: &str) -> Result<Self::Queue, PoolError>;
}

/// Queue reference that can make sure the remote queue exists
#[async_trait]
pub trait ProvisionQueue: Send + Sync {
    /// Create the remote queue if it is missing.
    ///
    /// Returns `true` when the queue was created and `false` when it already
    /// existed. Safe to call repeatedly.
    async fn create_if_not_exists(&self) -> Result<bool, PoolError>;
}

/// Await `future` for at most `duration`.
///
/// Expiry only abandons this caller's wait. An attempt already in flight in a
/// [`QueueFactory`] keeps running on the Tokio runtime, even when no caller is
/// left, and its outcome is recorded for the next call.
///
/// # Errors
///
/// Returns [`PoolError::Timeout`] on expiry, otherwise the future's own result.
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, PoolError>
where
    F: Future<Output = Result<T, PoolError>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => {
            warn!(timeout = ?duration, "Pooled operation timed out");
            Err(PoolError::Timeout { duration })
        }
    }
}
