//! Per (module, user) permission cache backed by control channel round trips.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::models::SecurityQuery;
use crate::domain::ports::{SecurityBackend, SecurityService};

type UserQuery = (String, SecurityQuery);

#[derive(Debug, Default)]
struct ModuleEntries {
    generation: u64,
    answers: HashMap<UserQuery, Value>,
}

/// Lazily populated permission cache.
///
/// Each distinct (module, user, query) costs one round trip. Failed or
/// unanswerable lookups are denied and never cached.
pub struct SecurityCache {
    backend: Arc<dyn SecurityBackend>,
    modules: RwLock<HashMap<String, ModuleEntries>>,
}

impl std::fmt::Debug for SecurityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityCache")
            .field("connected", &self.backend.is_connected())
            .field("entries", &self.len())
            .finish()
    }
}

impl SecurityCache {
    /// Cache answering misses through `backend`.
    pub fn new(backend: Arc<dyn SecurityBackend>) -> Arc<Self> {
        Arc::new(Self {
            backend,
            modules: RwLock::new(HashMap::new()),
        })
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, ModuleEntries>> {
        self.modules
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, ModuleEntries>> {
        self.modules
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Answer `query` for (module, user).
    pub async fn query(&self, module_name: &str, user_id: &str, query: SecurityQuery) -> Value {
        let key = (user_id.to_string(), query);
        let generation = {
            let modules = self.read();
            match modules.get(module_name) {
                Some(entries) => {
                    if let Some(value) = entries.answers.get(&key) {
                        return value.clone();
                    }
                    entries.generation
                }
                None => 0,
            }
        };

        if !self.backend.is_connected() {
            debug!(module_name, user_id, "control channel down, denying security query");
            return key.1.deny_value();
        }

        match self
            .backend
            .security_query(module_name, user_id, key.1.clone())
            .await
        {
            Ok(value) => {
                let mut modules = self.write();
                let entries = modules.entry(module_name.to_string()).or_default();
                // a clear while the round trip was in flight makes this answer stale
                if entries.generation == generation {
                    entries.answers.insert(key, value.clone());
                }
                value
            }
            Err(e) => {
                warn!(module_name, user_id, error = %e, "security query failed, denying");
                key.1.deny_value()
            }
        }
    }

    /// Drop every cached answer for `module_name`.
    pub fn clear_module(&self, module_name: &str) {
        let mut modules = self.write();
        let entries = modules.entry(module_name.to_string()).or_default();
        entries.generation += 1;
        let cleared = entries.answers.len();
        entries.answers.clear();
        debug!(module_name, cleared, "security cache cleared");
    }

    /// Number of cached answers.
    pub fn len(&self) -> usize {
        self.read().values().map(|e| e.answers.len()).sum()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Security service scoped to (module, user).
    pub fn service(self: &Arc<Self>, module_name: &str, user_id: &str) -> Arc<dyn SecurityService> {
        Arc::new(CachedSecurityService {
            cache: Arc::clone(self),
            module_name: module_name.to_string(),
            user_id: user_id.to_string(),
        })
    }
}

struct CachedSecurityService {
    cache: Arc<SecurityCache>,
    module_name: String,
    user_id: String,
}

#[async_trait]
impl SecurityService for CachedSecurityService {
    fn module_name(&self) -> &str {
        &self.module_name
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }

    async fn query(&self, query: SecurityQuery) -> Value {
        self.cache.query(&self.module_name, &self.user_id, query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::ChannelError;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeBackend {
        connected: AtomicBool,
        fail: AtomicBool,
        calls: AtomicUsize,
    }

    impl FakeBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                connected: AtomicBool::new(true),
                fail: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SecurityBackend for FakeBackend {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn security_query(
            &self,
            _module_name: &str,
            user_id: &str,
            query: SecurityQuery,
        ) -> Result<Value, ChannelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(ChannelError::Timeout(std::time::Duration::from_secs(1)));
            }
            Ok(match query {
                SecurityQuery::Attributes => json!({"user": user_id}),
                _ => json!(user_id == "alice"),
            })
        }
    }

    fn action(name: &str) -> SecurityQuery {
        SecurityQuery::Action {
            action_name: name.into(),
        }
    }

    #[tokio::test]
    async fn test_one_round_trip_per_key() {
        let backend = FakeBackend::new();
        let cache = SecurityCache::new(backend.clone());

        assert_eq!(cache.query("geo", "alice", action("read")).await, json!(true));
        assert_eq!(cache.query("geo", "alice", action("read")).await, json!(true));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        assert_eq!(cache.query("geo", "bob", action("read")).await, json!(false));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_clear_module_forces_refetch() {
        let backend = FakeBackend::new();
        let cache = SecurityCache::new(backend.clone());

        cache.query("geo", "alice", action("read")).await;
        cache.query("roads", "alice", action("read")).await;
        cache.clear_module("geo");
        assert_eq!(cache.len(), 1);

        cache.query("geo", "alice", action("read")).await;
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_disconnected_denies_without_round_trip() {
        let backend = FakeBackend::new();
        backend.connected.store(false, Ordering::SeqCst);
        let cache = SecurityCache::new(backend.clone());

        assert_eq!(cache.query("geo", "alice", action("read")).await, json!(false));
        assert_eq!(
            cache.query("geo", "alice", SecurityQuery::Attributes).await,
            json!({})
        );
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        assert!(cache.is_empty());

        backend.connected.store(true, Ordering::SeqCst);
        assert_eq!(cache.query("geo", "alice", action("read")).await, json!(true));
    }

    #[tokio::test]
    async fn test_failures_are_denied_and_not_cached() {
        let backend = FakeBackend::new();
        backend.fail.store(true, Ordering::SeqCst);
        let cache = SecurityCache::new(backend.clone());

        assert_eq!(cache.query("geo", "alice", action("read")).await, json!(false));
        assert!(cache.is_empty());

        backend.fail.store(false, Ordering::SeqCst);
        assert_eq!(cache.query("geo", "alice", action("read")).await, json!(true));
    }

    #[tokio::test]
    async fn test_service_helpers() {
        let cache = SecurityCache::new(FakeBackend::new());
        let service = cache.service("geo", "alice");
        assert_eq!(service.module_name(), "geo");
        assert!(service.can_perform_action("read").await);
        assert!(service.is_in_group("admins").await);
        assert_eq!(service.user_attributes().await["user"], json!("alice"));

        let bob = cache.service("geo", "bob");
        assert!(!bob.can_access_resource("Layer", "7", "edit").await);
    }
}
