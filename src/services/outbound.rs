//! Queue of status messages bound for the coordinator.
//!
//! Components push [`ControlMessage`]s without waiting on the network; the
//! scheduling loop flushes the queue, retrying each message until the
//! coordinator accepts it or the worker shuts down.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::backoff::AdaptiveBackoff;
use crate::domain::models::ControlMessage;
use crate::domain::ports::CoordinatorClient;

/// FIFO of pending outbound messages.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    messages: Mutex<VecDeque<ControlMessage>>,
    notify: Notify,
}

impl OutboundQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<ControlMessage>> {
        self.messages
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Queue a message and wake the flusher.
    pub fn push(&self, message: ControlMessage) {
        debug!(message_type = message.message_type(), "queued outbound message");
        self.lock().push_back(message);
        self.notify.notify_one();
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the queued messages, oldest first.
    pub fn snapshot(&self) -> Vec<ControlMessage> {
        self.lock().iter().cloned().collect()
    }

    /// Resolves when a message is pushed.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    /// Send every queued message in order.
    ///
    /// A transient failure retries the same message after a growing delay;
    /// a permanent rejection drops it. Returns the number of messages
    /// delivered; stops early when `shutdown` is cancelled.
    pub async fn flush(
        &self,
        client: &Arc<dyn CoordinatorClient>,
        retry: AdaptiveBackoff,
        shutdown: &CancellationToken,
    ) -> usize {
        let mut delivered = 0;
        let mut retry = retry;
        loop {
            let Some(message) = self.lock().front().cloned() else {
                return delivered;
            };
            match client.send_message(&message).await {
                Ok(()) => {
                    self.lock().pop_front();
                    retry.reset();
                    delivered += 1;
                }
                Err(e) if e.is_transient() => {
                    let wait = retry.increase();
                    warn!(
                        message_type = message.message_type(),
                        error = %e,
                        retry_in_secs = wait.as_secs_f64(),
                        "unable to send message to coordinator"
                    );
                    tokio::select! {
                        () = shutdown.cancelled() => return delivered,
                        () = tokio::time::sleep(wait.max(Duration::from_millis(1))) => {}
                    }
                }
                Err(e) => {
                    warn!(
                        message_type = message.message_type(),
                        error = %e,
                        "coordinator rejected message, dropping it"
                    );
                    self.lock().pop_front();
                }
            }
            if shutdown.is_cancelled() {
                return delivered;
            }
        }
    }
}
