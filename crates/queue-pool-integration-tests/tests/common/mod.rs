//! Common test utilities for queue-pool integration tests
//!
//! This module provides:
//! - A client factory whose configuration can be broken and fixed at runtime
//! - A backend client implementing both resource collaborators
//! - Counters for every construction and provisioning call

use async_trait::async_trait;
use queue_pool::{
    ClientFactory, ClientProvider, ConfigurationError, ConstructionError, PoolError,
    ProvisionQueue, QueueClient, QueueFactory, SenderClient, SenderFactory,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Counters
// ============================================================================

/// Calls observed by the mock backend
#[derive(Debug, Default)]
pub struct Counters {
    pub client_builds: AtomicUsize,
    pub sender_builds: AtomicUsize,
    pub provisions: AtomicUsize,
    failing_provisions: AtomicUsize,
}

impl Counters {
    pub fn client_builds(&self) -> usize {
        self.client_builds.load(Ordering::SeqCst)
    }

    pub fn sender_builds(&self) -> usize {
        self.sender_builds.load(Ordering::SeqCst)
    }

    pub fn provisions(&self) -> usize {
        self.provisions.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Mock Client Factory
// ============================================================================

/// Client factory that fails with a missing-setting error until configured
pub struct MockClientFactory {
    counters: Arc<Counters>,
    configured: AtomicBool,
    build_delay: Duration,
    provision_delay: Duration,
}

#[allow(dead_code)]
impl MockClientFactory {
    pub fn configured() -> Arc<Self> {
        Self::with(true, Duration::ZERO, Duration::ZERO)
    }

    pub fn unconfigured() -> Arc<Self> {
        Self::with(false, Duration::ZERO, Duration::ZERO)
    }

    pub fn with(configured: bool, build_delay: Duration, provision_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            counters: Arc::new(Counters::default()),
            configured: AtomicBool::new(configured),
            build_delay,
            provision_delay,
        })
    }

    pub fn counters(&self) -> &Arc<Counters> {
        &self.counters
    }

    /// Supply the missing setting; later builds succeed
    pub fn fix_configuration(&self) {
        self.configured.store(true, Ordering::SeqCst);
    }

    /// Make the next `count` provisioning calls fail
    pub fn fail_next_provisions(&self, count: usize) {
        self.counters
            .failing_provisions
            .store(count, Ordering::SeqCst);
    }
}

impl ClientFactory for MockClientFactory {
    type Client = MockClient;

    fn create_client(&self) -> Result<MockClient, PoolError> {
        self.counters.client_builds.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.build_delay);
        if !self.configured.load(Ordering::SeqCst) {
            return Err(ConfigurationError::Missing {
                field: "service_bus_connection_string".to_string(),
            }
            .into());
        }
        Ok(MockClient {
            counters: Arc::clone(&self.counters),
            provision_delay: self.provision_delay,
        })
    }
}

// ============================================================================
// Mock Client and Resources
// ============================================================================

pub struct MockClient {
    counters: Arc<Counters>,
    provision_delay: Duration,
}

#[derive(Debug)]
pub struct MockSender {
    pub path: String,
}

#[derive(Debug)]
pub struct MockQueue {
    pub name: String,
    counters: Arc<Counters>,
    delay: Duration,
}

impl SenderClient for MockClient {
    type Sender = MockSender;

    fn create_sender(&self, name: &str) -> Result<MockSender, PoolError> {
        self.counters.sender_builds.fetch_add(1, Ordering::SeqCst);
        Ok(MockSender {
            path: name.to_string(),
        })
    }
}

impl QueueClient for MockClient {
    type Queue = MockQueue;

    fn queue_reference(&self, name: &str) -> Result<MockQueue, PoolError> {
        Ok(MockQueue {
            name: name.to_string(),
            counters: Arc::clone(&self.counters),
            delay: self.provision_delay,
        })
    }
}

#[async_trait]
impl ProvisionQueue for MockQueue {
    async fn create_if_not_exists(&self) -> Result<bool, PoolError> {
        self.counters.provisions.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;

        let failing = self
            .counters
            .failing_provisions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ConstructionError::ConnectionFailed {
                message: format!("{} unreachable", self.name),
            }
            .into());
        }
        Ok(true)
    }
}

// ============================================================================
// Fixture Builders
// ============================================================================

#[allow(dead_code)]
pub fn sender_factory(factory: &Arc<MockClientFactory>) -> Arc<SenderFactory<MockClient>> {
    let clients = Arc::new(ClientProvider::<MockClient>::new(factory.clone()));
    Arc::new(SenderFactory::new(clients))
}

#[allow(dead_code)]
pub fn queue_factory(factory: &Arc<MockClientFactory>) -> Arc<QueueFactory<MockClient>> {
    let clients = Arc::new(ClientProvider::<MockClient>::new(factory.clone()));
    Arc::new(QueueFactory::new(clients))
}
