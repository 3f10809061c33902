//! Correlation map for asynchronous request/response round trips.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::domain::errors::ChannelError;

type Reply<T> = oneshot::Sender<Result<T, ChannelError>>;

/// Pending round trips keyed by correlation id.
///
/// A caller registers an id before sending its request, then awaits the
/// receiver with a bounded wait. The receive loop resolves entries; entries
/// that time out are removed by the waiter.
pub struct PendingRequests<K, T> {
    entries: Mutex<HashMap<K, Reply<T>>>,
}

impl<K, T> Default for PendingRequests<K, T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, T> PendingRequests<K, T>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<K, Reply<T>>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Register `id` and return the receiver its answer will arrive on.
    pub fn register(&self, id: K) -> oneshot::Receiver<Result<T, ChannelError>> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(id, tx);
        rx
    }

    /// Deliver the answer for `id`. Returns `false` if nothing was waiting.
    pub fn resolve(&self, id: &K, value: Result<T, ChannelError>) -> bool {
        match self.lock().remove(id) {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    /// Forget `id` without answering it.
    pub fn remove(&self, id: &K) {
        self.lock().remove(id);
    }

    /// Fail every pending entry with `error`; returns how many were failed.
    pub fn fail_all(&self, error: &ChannelError) -> usize {
        let drained: Vec<_> = self.lock().drain().collect();
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(error.clone()));
        }
        count
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Await the answer for `id`, removing the entry if `timeout` elapses.
    pub async fn wait(
        &self,
        id: &K,
        rx: oneshot::Receiver<Result<T, ChannelError>>,
        timeout: Duration,
    ) -> Result<T, ChannelError> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ChannelError::Closed),
            Err(_) => {
                self.remove(id);
                Err(ChannelError::Timeout(timeout))
            }
        }
    }
}
