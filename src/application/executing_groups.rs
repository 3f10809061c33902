//! The set of groups executing on this worker.
//!
//! A group id enters the set when its assignment is accepted and leaves it
//! when the [`GroupLease`] returned at admission is dropped, so membership
//! lasts exactly as long as the task that owns the lease. Each member has a
//! cancellation token the executor polls between requests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Executing group ids and their cancellation handles.
#[derive(Debug, Default)]
pub struct ExecutingGroups {
    groups: Mutex<HashMap<String, CancellationToken>>,
}

impl ExecutingGroups {
    /// Empty set.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.groups
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Add `group_id`, with a token cancelled when `parent` is. Returns `None`
    /// if the group is already executing.
    pub fn admit(self: &Arc<Self>, group_id: &str, parent: &CancellationToken) -> Option<GroupLease> {
        let mut groups = self.lock();
        if groups.contains_key(group_id) {
            return None;
        }
        let token = parent.child_token();
        groups.insert(group_id.to_string(), token.clone());
        Some(GroupLease {
            groups: Arc::clone(self),
            group_id: group_id.to_string(),
            token,
        })
    }

    /// Cancel an executing group. Returns whether it was executing.
    pub fn cancel(&self, group_id: &str) -> bool {
        match self.lock().get(group_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every executing group.
    pub fn cancel_all(&self) {
        for token in self.lock().values() {
            token.cancel();
        }
    }

    /// Whether `group_id` is executing.
    pub fn contains(&self, group_id: &str) -> bool {
        self.lock().contains_key(group_id)
    }

    /// Executing group ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of executing groups.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no group is executing.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Membership of one group in [`ExecutingGroups`]; removes it on drop.
#[derive(Debug)]
pub struct GroupLease {
    groups: Arc<ExecutingGroups>,
    group_id: String,
    token: CancellationToken,
}

impl GroupLease {
    /// Group id.
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Cancellation token of the group.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for GroupLease {
    fn drop(&mut self) {
        self.groups.lock().remove(&self.group_id);
        debug!(group_id = %self.group_id, "group left executing set");
    }
}
