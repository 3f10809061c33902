//! Routes control messages to the component that handles them.
//!
//! Messages arrive from the control channel's receive loop and as numbered
//! messages piggy-backed on poll responses; both go through [`ControlRouter::handle`].

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::executing_groups::ExecutingGroups;
use crate::domain::models::{ControlMessage, GroupAssignment};
use crate::services::{ModuleRegistry, SecurityCache};

/// Dispatches inbound control messages.
pub struct ControlRouter {
    registry: Arc<ModuleRegistry>,
    security: Arc<SecurityCache>,
    groups: Arc<ExecutingGroups>,
    pushed: Mutex<VecDeque<GroupAssignment>>,
    // completion signal of the last queued start/stop per module name
    module_ops: Mutex<HashMap<String, oneshot::Receiver<()>>>,
    wake: Arc<Notify>,
}

impl ControlRouter {
    /// Create a router. `wake` is notified whenever the scheduling loop
    /// should stop sleeping.
    pub fn new(
        registry: Arc<ModuleRegistry>,
        security: Arc<SecurityCache>,
        groups: Arc<ExecutingGroups>,
        wake: Arc<Notify>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            security,
            groups,
            pushed: Mutex::new(VecDeque::new()),
            module_ops: Mutex::new(HashMap::new()),
            wake,
        })
    }

    fn lock_pushed(&self) -> std::sync::MutexGuard<'_, VecDeque<GroupAssignment>> {
        self.pushed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Oldest pushed assignment not yet taken.
    pub fn take_pushed(&self) -> Option<GroupAssignment> {
        self.lock_pushed().pop_front()
    }

    /// Number of pushed assignments waiting.
    pub fn pushed_len(&self) -> usize {
        self.lock_pushed().len()
    }

    /// Run a module start or stop in the background, after every operation
    /// queued earlier for the same module name.
    fn spawn_module_op<F>(&self, module_name: &str, op: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let previous = self
            .module_ops
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(module_name.to_string(), done_rx);
        tokio::spawn(async move {
            if let Some(previous) = previous {
                // resolves when the earlier operation's sender is dropped
                let _ = previous.await;
            }
            op.await;
            drop(done_tx);
        })
    }

    /// Start loading a module version in the background.
    pub fn start_module(&self, module_name: String, module_time: i64) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        self.spawn_module_op(&module_name.clone(), async move {
            registry.load(&module_name, module_time).await;
        })
    }

    /// Stop a module in the background.
    pub fn stop_module(&self, module_name: String, module_time: Option<i64>) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        self.spawn_module_op(&module_name.clone(), async move {
            registry.stop(&module_name, module_time).await;
        })
    }

    /// Handle one message.
    pub async fn handle(&self, message: ControlMessage) {
        match message {
            ControlMessage::ModuleStart {
                module_name,
                module_time,
                ..
            } => {
                info!(module_name = %module_name, module_time, "module start requested");
                self.start_module(module_name, module_time);
            }
            ControlMessage::ModuleStop {
                module_name,
                module_time,
            } => {
                info!(module_name = %module_name, ?module_time, "module stop requested");
                self.stop_module(module_name, module_time);
            }
            ControlMessage::SecurityChanged { module_name } => {
                self.security.clear_module(&module_name);
            }
            ControlMessage::CancelGroup { group_id } => {
                if self.groups.cancel(&group_id) {
                    info!(group_id = %group_id, "group cancelled by coordinator");
                    self.wake.notify_one();
                } else {
                    debug!(group_id = %group_id, "cancel for a group not executing here");
                }
            }
            ControlMessage::GroupAssigned(assignment) => {
                debug!(group_id = %assignment.group_id, "group assignment pushed");
                self.lock_pushed().push_back(assignment);
                self.wake.notify_one();
            }
            other => {
                debug!(message_type = other.message_type(), "ignoring control message");
            }
        }
    }

    /// Spawn the loop handling messages from `inbound` until shutdown.
    pub fn start(
        self: &Arc<Self>,
        mut inbound: mpsc::UnboundedReceiver<ControlMessage>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let router = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    message = inbound.recv() => match message {
                        Some(message) => router.handle(message).await,
                        None => break,
                    },
                }
            }
            debug!("control router stopped");
        })
    }
}
