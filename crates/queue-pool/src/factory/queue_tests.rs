//! Tests for the asynchronous queue factory.

use super::*;
use crate::client_provider::ClientFactory;
use crate::error::{ConfigurationError, ConstructionError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
struct Counters {
    clients: AtomicUsize,
    references: AtomicUsize,
    provisions: AtomicUsize,
    failures_left: AtomicUsize,
}

#[derive(Debug)]
struct TestQueue {
    name: String,
    counters: Arc<Counters>,
    delay: Duration,
}

#[async_trait]
impl ProvisionQueue for TestQueue {
    async fn create_if_not_exists(&self) -> Result<bool, PoolError> {
        self.counters.provisions.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let failing = self
            .counters
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ConstructionError::Provider {
                provider: "Test".to_string(),
                status: 503,
                code: "ServerBusy".to_string(),
                message: format!("{} not provisioned", self.name),
            }
            .into());
        }
        Ok(true)
    }
}

struct TestClient {
    counters: Arc<Counters>,
    delay: Duration,
}

impl QueueClient for TestClient {
    type Queue = TestQueue;

    fn queue_reference(&self, name: &str) -> Result<TestQueue, PoolError> {
        self.counters.references.fetch_add(1, Ordering::SeqCst);
        Ok(TestQueue {
            name: name.to_string(),
            counters: Arc::clone(&self.counters),
            delay: self.delay,
        })
    }
}

struct TestClientFactory {
    counters: Arc<Counters>,
    configured: AtomicBool,
    delay: Duration,
}

impl ClientFactory for TestClientFactory {
    type Client = TestClient;

    fn create_client(&self) -> Result<TestClient, PoolError> {
        self.counters.clients.fetch_add(1, Ordering::SeqCst);
        if !self.configured.load(Ordering::SeqCst) {
            return Err(ConfigurationError::Missing {
                field: "storage_connection_string".to_string(),
            }
            .into());
        }
        Ok(TestClient {
            counters: Arc::clone(&self.counters),
            delay: self.delay,
        })
    }
}

fn factory_with(
    configured: bool,
    delay: Duration,
) -> (Arc<QueueFactory<TestClient>>, Arc<TestClientFactory>, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let client_factory = Arc::new(TestClientFactory {
        counters: Arc::clone(&counters),
        configured: AtomicBool::new(configured),
        delay,
    });
    let provider = Arc::new(ClientProvider::<TestClient>::new(client_factory.clone()));
    (Arc::new(QueueFactory::new(provider)), client_factory, counters)
}

#[tokio::test]
async fn test_empty_name_is_rejected_before_cache() {
    let (factory, _, counters) = factory_with(true, Duration::ZERO);

    let err = factory.get_queue("").await.unwrap_err();

    assert!(matches!(err, PoolError::InvalidArgument(_)));
    assert_eq!(err.to_string(), "name cannot be null or empty.");
    assert!(factory.names().is_empty());
    assert_eq!(counters.clients.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_same_name_provisions_once() {
    let (factory, _, counters) = factory_with(true, Duration::ZERO);

    let first = factory.get_queue("orders").await.unwrap();
    let second = factory.get_queue("orders").await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.name, "orders");
    assert!(factory.is_cached("orders"));
    assert_eq!(counters.references.load(Ordering::SeqCst), 1);
    assert_eq!(counters.provisions.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fan_out_over_two_names() {
    let (factory, _, counters) = factory_with(true, Duration::from_millis(50));

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let factory = Arc::clone(&factory);
            tokio::spawn(async move {
                factory
                    .get_queue(&format!("test-queue-{}", i % 2))
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut queues = Vec::new();
    for handle in handles {
        queues.push(handle.await.unwrap());
    }

    let (even, odd): (Vec<_>, Vec<_>) = queues.iter().partition(|q| q.name == "test-queue-0");
    assert_eq!(even.len(), 3);
    assert_eq!(odd.len(), 3);
    assert!(even.iter().all(|q| Arc::ptr_eq(q, even[0])));
    assert!(odd.iter().all(|q| Arc::ptr_eq(q, odd[0])));
    assert!(!Arc::ptr_eq(even[0], odd[0]));

    assert_eq!(counters.clients.load(Ordering::SeqCst), 1);
    assert_eq!(counters.provisions.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_client_configuration_error_then_recovery() {
    let (factory, client_factory, counters) = factory_with(false, Duration::ZERO);

    let err = factory.get_queue("orders").await.unwrap_err();
    assert!(matches!(err, PoolError::Configuration(_)));
    assert_eq!(err.to_string(), "storage_connection_string cannot be null or empty.");
    assert!(!factory.is_cached("orders"));
    assert_eq!(counters.provisions.load(Ordering::SeqCst), 0);

    client_factory.configured.store(true, Ordering::SeqCst);
    let queue = factory.get_queue("orders").await.unwrap();

    assert_eq!(queue.name, "orders");
    assert_eq!(counters.clients.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_provisioning_failure_is_shared_then_retried() {
    let (factory, _, counters) = factory_with(true, Duration::from_millis(50));
    counters.failures_left.store(1, Ordering::SeqCst);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let factory = Arc::clone(&factory);
            tokio::spawn(async move { factory.get_queue("flaky").await })
        })
        .collect();

    for handle in handles {
        let err = handle.await.unwrap().unwrap_err();
        assert!(err.is_transient());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
    }
    assert_eq!(counters.provisions.load(Ordering::SeqCst), 1);

    let queue = factory.get_queue("flaky").await.unwrap();
    assert_eq!(queue.name, "flaky");
    assert_eq!(counters.provisions.load(Ordering::SeqCst), 2);
    assert_eq!(counters.clients.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timed_out_caller_does_not_cancel_provisioning() {
    let (factory, _, counters) = factory_with(true, Duration::from_millis(200));

    let err = crate::factory::with_timeout(Duration::from_millis(20), factory.get_queue("slow"))
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::Timeout { .. }));

    let queue = factory.get_queue("slow").await.unwrap();
    assert_eq!(queue.name, "slow");
    assert_eq!(counters.provisions.load(Ordering::SeqCst), 1);
}
