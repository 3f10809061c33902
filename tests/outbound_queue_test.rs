//! Integration tests for delivering queued status messages.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use common::MockCoordinator;
use groupworker::domain::models::ControlMessage;
use groupworker::domain::ports::CoordinatorClient;
use groupworker::services::{AdaptiveBackoff, OutboundQueue};

fn failed(group_id: &str) -> ControlMessage {
    ControlMessage::FailedGroupId {
        group_id: group_id.to_string(),
    }
}

fn retry() -> AdaptiveBackoff {
    AdaptiveBackoff::new(Duration::from_millis(5), Duration::from_millis(20))
}

#[tokio::test]
async fn test_flush_delivers_in_order() {
    let coordinator = MockCoordinator::new();
    let client: Arc<dyn CoordinatorClient> = coordinator.clone();
    let queue = OutboundQueue::new();
    queue.push(failed("1"));
    queue.push(failed("2"));

    let delivered = queue.flush(&client, retry(), &CancellationToken::new()).await;

    assert_eq!(delivered, 2);
    assert!(queue.is_empty());
    assert_eq!(coordinator.sent(), vec![failed("1"), failed("2")]);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let coordinator = MockCoordinator::new();
    coordinator.fail_sends(3);
    let client: Arc<dyn CoordinatorClient> = coordinator.clone();
    let queue = OutboundQueue::new();
    queue.push(failed("1"));
    queue.push(failed("2"));

    let delivered = queue.flush(&client, retry(), &CancellationToken::new()).await;

    assert_eq!(delivered, 2);
    assert_eq!(coordinator.sent(), vec![failed("1"), failed("2")]);
}

#[tokio::test]
async fn test_permanent_rejection_drops_message() {
    let coordinator = MockCoordinator::new();
    coordinator.reject_sends();
    let client: Arc<dyn CoordinatorClient> = coordinator.clone();
    let queue = OutboundQueue::new();
    queue.push(failed("1"));

    let delivered = queue.flush(&client, retry(), &CancellationToken::new()).await;

    assert_eq!(delivered, 0);
    assert!(queue.is_empty());
    assert!(coordinator.sent().is_empty());
}

#[tokio::test]
async fn test_shutdown_interrupts_retry() {
    let coordinator = MockCoordinator::new();
    coordinator.fail_sends(usize::MAX);
    let client: Arc<dyn CoordinatorClient> = coordinator.clone();
    let queue = Arc::new(OutboundQueue::new());
    queue.push(failed("1"));

    let shutdown = CancellationToken::new();
    let flusher = {
        let queue = Arc::clone(&queue);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { queue.flush(&client, retry(), &shutdown).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.cancel();

    let delivered = tokio::time::timeout(Duration::from_secs(2), flusher)
        .await
        .expect("flush must stop on shutdown")
        .unwrap();
    assert_eq!(delivered, 0);
    assert_eq!(queue.len(), 1, "undelivered message stays queued");
}
