//! Tests for the in-memory backend.

use super::*;
use crate::client_provider::ClientProvider;
use crate::factory::{QueueFactory, SenderFactory};

// ============================================================================
// Direct Backend Tests
// ============================================================================

mod backend {
    use super::*;

    /// Verify that a new factory has not touched the backend.
    #[test]
    fn test_new_factory_has_zero_stats() {
        let factory = InMemoryClientFactory::new();
        assert_eq!(factory.stats(), InMemoryStats::default());
        assert!(!factory.queue_exists("orders"));
        assert!(factory.sent_messages("orders").is_empty());
    }

    /// Verify that every client build is counted and yields a new client.
    #[test]
    fn test_client_builds_are_counted() {
        let factory = InMemoryClientFactory::new();

        let first = factory.create_client().unwrap();
        let second = factory.create_client().unwrap();

        assert_ne!(first.id(), second.id());
        assert_eq!(factory.stats().client_builds, 2);
    }

    /// Verify that injected client failures are consumed one by one.
    #[test]
    fn test_injected_client_failures() {
        let factory = InMemoryClientFactory::new();
        factory.fail_next_client_builds(2);

        for _ in 0..2 {
            let err = factory.create_client().unwrap_err();
            assert_eq!(err.to_string(), "storage_connection_string cannot be null or empty.");
        }
        assert!(factory.create_client().is_ok());
        assert_eq!(factory.stats().client_builds, 3);
    }

    /// Verify that senders record bodies under their queue name.
    #[test]
    fn test_sender_records_bodies() {
        let factory = InMemoryClientFactory::new();
        let client = factory.create_client().unwrap();
        let sender = client.create_sender("orders").unwrap();

        sender.send("first").unwrap();
        sender.send(vec![1u8, 2, 3]).unwrap();

        assert_eq!(sender.path(), "orders");
        assert_eq!(
            factory.sent_messages("orders"),
            vec![Bytes::from("first"), Bytes::from(vec![1u8, 2, 3])]
        );
        assert_eq!(factory.stats().sender_builds, 1);
    }

    /// Verify that provisioning reports creation only the first time.
    #[tokio::test]
    async fn test_provisioning_is_idempotent() {
        let factory = InMemoryClientFactory::new();
        let client = factory.create_client().unwrap();
        let queue = client.queue_reference("orders").unwrap();

        assert!(queue.create_if_not_exists().await.unwrap());
        assert!(!queue.create_if_not_exists().await.unwrap());
        assert!(factory.queue_exists("orders"));
        assert_eq!(queue.name(), "orders");
        assert_eq!(factory.stats().provision_calls, 2);
    }

    /// Verify that injected provisioning failures are transient.
    #[tokio::test]
    async fn test_injected_provision_failure() {
        let factory = InMemoryClientFactory::new();
        factory.fail_next_provisions(1);
        let queue = factory
            .create_client()
            .unwrap()
            .queue_reference("orders")
            .unwrap();

        let err = queue.create_if_not_exists().await.unwrap_err();
        assert!(err.is_transient());
        assert!(!factory.queue_exists("orders"));

        assert!(queue.create_if_not_exists().await.unwrap());
    }
}

// ============================================================================
// Pooled Factory Tests
// ============================================================================

mod pooled {
    use super::*;
    use std::sync::Arc;

    fn provider(factory: &InMemoryClientFactory) -> Arc<ClientProvider<InMemoryClient>> {
        Arc::new(ClientProvider::from_factory(factory.clone()))
    }

    /// Verify that the sender pool builds one client and one sender per name.
    #[test]
    fn test_sender_pool_over_memory_backend() {
        let backend = InMemoryClientFactory::new();
        let senders = SenderFactory::new(provider(&backend));

        let a = senders.get_sender("a").unwrap();
        let again = senders.get_sender("a").unwrap();
        let b = senders.get_sender("b").unwrap();

        assert!(Arc::ptr_eq(&a, &again));
        assert_ne!(a.client_id(), b.client_id());
        assert_eq!(
            backend.stats(),
            InMemoryStats {
                client_builds: 1,
                sender_builds: 2,
                queue_references: 0,
                provision_calls: 0,
            }
        );
    }

    /// Verify that the queue pool provisions each name once.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_queue_pool_over_memory_backend() {
        let backend = InMemoryClientFactory::new();
        backend.set_provision_delay(Duration::from_millis(30));
        let queues = Arc::new(QueueFactory::new(provider(&backend)));

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let queues = Arc::clone(&queues);
                tokio::spawn(async move {
                    queues.get_queue(&format!("test-queue-{}", i % 2)).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(backend.queue_exists("test-queue-0"));
        assert!(backend.queue_exists("test-queue-1"));
        let stats = backend.stats();
        assert_eq!(stats.client_builds, 1);
        assert_eq!(stats.queue_references, 2);
        assert_eq!(stats.provision_calls, 2);
    }
}
