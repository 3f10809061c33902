//! Scheduling loop: admits work up to the concurrency bound.
//!
//! One loop requests (or takes pushed) work, starts group tasks on a bounded
//! pool, loads modules it is told about, and sleeps with adaptive backoff
//! when there is nothing to do. A finished task, a cancel or a pushed
//! assignment wakes it early.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::control_router::ControlRouter;
use super::executing_groups::ExecutingGroups;
use crate::domain::models::{ControlMessage, DispatchMode, GroupAssignment};
use crate::domain::ports::{CoordinatorClient, NextWork, WorkRequest};
use crate::services::{AdaptiveBackoff, GroupExecutor, ModuleRegistry, OutboundQueue};

/// Static settings of the scheduling loop.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// This worker's id
    pub worker_id: String,
    /// Epoch milliseconds the worker started
    pub worker_start_time: i64,
    /// Concurrency bound N
    pub max_concurrent_groups: usize,
    /// Poll the coordinator or wait for pushed assignments
    pub mode: DispatchMode,
    /// Backoff increase per empty or failed attempt
    pub backoff_step: Duration,
    /// Backoff cap
    pub max_backoff: Duration,
    /// Longest time between heartbeats
    pub heartbeat_interval: Duration,
    /// How long shutdown waits for running groups
    pub drain_timeout: Duration,
}

/// Result of one attempt to obtain work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    /// Work was received; try again straight away
    Busy,
    /// Nothing to do
    Idle,
    /// The coordinator could not be reached
    Failed,
}

/// The scheduling loop and the pool it drives.
pub struct WorkerScheduler {
    settings: SchedulerSettings,
    coordinator: Arc<dyn CoordinatorClient>,
    registry: Arc<ModuleRegistry>,
    executor: Arc<GroupExecutor>,
    outbound: Arc<OutboundQueue>,
    groups: Arc<ExecutingGroups>,
    router: Arc<ControlRouter>,
    permits: Arc<Semaphore>,
    wake: Arc<Notify>,
    max_message_id: AtomicI64,
}

impl WorkerScheduler {
    /// Create the loop. `wake` must be the notifier handed to `router`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: SchedulerSettings,
        coordinator: Arc<dyn CoordinatorClient>,
        registry: Arc<ModuleRegistry>,
        executor: Arc<GroupExecutor>,
        outbound: Arc<OutboundQueue>,
        groups: Arc<ExecutingGroups>,
        router: Arc<ControlRouter>,
        wake: Arc<Notify>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_groups));
        Self {
            settings,
            coordinator,
            registry,
            executor,
            outbound,
            groups,
            router,
            permits,
            wake,
            max_message_id: AtomicI64::new(0),
        }
    }

    /// Number of groups currently holding a pool slot.
    pub fn running(&self) -> usize {
        self.settings
            .max_concurrent_groups
            .saturating_sub(self.permits.available_permits())
    }

    /// Highest piggy-backed message id processed.
    pub fn max_message_id(&self) -> i64 {
        self.max_message_id.load(Ordering::Acquire)
    }

    fn heartbeat(&self) -> ControlMessage {
        ControlMessage::ExecutingGroupIds {
            worker_id: self.settings.worker_id.clone(),
            executing_group_ids: self.groups.ids(),
        }
    }

    fn retry_backoff(&self) -> AdaptiveBackoff {
        AdaptiveBackoff::new(
            self.settings.backoff_step.min(Duration::from_secs(1)),
            self.settings.max_backoff,
        )
    }

    async fn flush(&self, shutdown: &CancellationToken) {
        self.outbound
            .flush(&self.coordinator, self.retry_backoff(), shutdown)
            .await;
    }

    /// Run until `shutdown` is cancelled, then cancel running groups and wait
    /// up to the drain timeout for them to finish.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            worker_id = %self.settings.worker_id,
            max_concurrent_groups = self.settings.max_concurrent_groups,
            mode = %self.settings.mode,
            "scheduling loop started"
        );
        let mut tasks = JoinSet::new();
        let mut backoff = AdaptiveBackoff::new(self.settings.backoff_step, self.settings.max_backoff);
        let mut last_heartbeat = Instant::now();

        while !shutdown.is_cancelled() {
            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    error!(error = %e, "group task aborted");
                }
            }

            self.flush(&shutdown).await;
            if shutdown.is_cancelled() {
                break;
            }

            if last_heartbeat.elapsed() >= self.settings.heartbeat_interval {
                self.outbound.push(self.heartbeat());
                last_heartbeat = Instant::now();
            }

            let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                debug!(running = self.running(), "pool full, sending heartbeat");
                self.outbound.push(self.heartbeat());
                last_heartbeat = Instant::now();
                self.flush(&shutdown).await;
                self.sleep(self.settings.max_backoff, &shutdown).await;
                continue;
            };

            let attempt = match self.settings.mode {
                DispatchMode::Poll => self.poll(permit, &mut tasks, &shutdown).await,
                DispatchMode::Push => match self.router.take_pushed() {
                    Some(assignment) => {
                        self.accept(assignment, permit, &mut tasks, &shutdown);
                        Attempt::Busy
                    }
                    None => Attempt::Idle,
                },
            };

            match attempt {
                Attempt::Busy => backoff.reset(),
                Attempt::Idle => {
                    let wait = backoff.increase();
                    self.sleep(wait, &shutdown).await;
                }
                Attempt::Failed => {
                    self.outbound.push(self.heartbeat());
                    last_heartbeat = Instant::now();
                    let wait = backoff.increase();
                    self.sleep(wait, &shutdown).await;
                }
            }
        }

        info!(running = tasks.len(), "scheduling loop stopping");
        self.groups.cancel_all();
        let drained = tokio::time::timeout(self.settings.drain_timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(remaining = tasks.len(), "groups still running after drain timeout, aborting");
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
        info!("scheduling loop stopped");
    }

    async fn sleep(&self, wait: Duration, shutdown: &CancellationToken) {
        if wait.is_zero() {
            return;
        }
        tokio::select! {
            () = shutdown.cancelled() => {}
            () = self.wake.notified() => {}
            () = tokio::time::sleep(wait) => {}
        }
    }

    async fn poll(
        &self,
        permit: OwnedSemaphorePermit,
        tasks: &mut JoinSet<()>,
        shutdown: &CancellationToken,
    ) -> Attempt {
        let request = WorkRequest {
            worker_start_time: self.settings.worker_start_time,
            max_message_id: self.max_message_id(),
            module_names: self.registry.started_module_names(),
        };

        let response = match self.coordinator.next_work(&request).await {
            Ok(response) => response,
            Err(e) if e.is_not_found() => {
                debug!("coordinator has no work for this worker");
                self.outbound.push(self.heartbeat());
                return Attempt::Idle;
            }
            Err(e) => {
                warn!(error = %e, "unable to get next work");
                return Attempt::Failed;
            }
        };

        let mut messages = response.messages;
        messages.sort_by_key(|(id, _)| *id);
        for (id, message) in messages {
            if id > self.max_message_id() {
                self.max_message_id.store(id, Ordering::Release);
                self.router.handle(message).await;
            }
        }

        match response.work {
            NextWork::NoWork => Attempt::Idle,
            NextWork::ModuleStart {
                module_name,
                module_time,
                bundle_count,
            } => {
                info!(module_name = %module_name, module_time, bundle_count, "module start assigned");
                self.router.start_module(module_name, module_time);
                Attempt::Busy
            }
            NextWork::Group(assignment) => {
                self.accept(assignment, permit, tasks, shutdown);
                Attempt::Busy
            }
        }
    }

    /// Register the group as executing, then start it on the pool.
    fn accept(
        &self,
        assignment: GroupAssignment,
        permit: OwnedSemaphorePermit,
        tasks: &mut JoinSet<()>,
        shutdown: &CancellationToken,
    ) {
        let Some(lease) = self.groups.admit(&assignment.group_id, shutdown) else {
            warn!(group_id = %assignment.group_id, "group already executing, ignoring assignment");
            return;
        };
        debug!(group_id = %assignment.group_id, "scheduling group");

        let executor = Arc::clone(&self.executor);
        let outbound = Arc::clone(&self.outbound);
        let wake = Arc::clone(&self.wake);
        tasks.spawn(async move {
            let _permit = permit;
            let group_id = assignment.group_id.clone();
            let run = executor.run(assignment, lease.token());
            if let Err(panic) = AssertUnwindSafe(run).catch_unwind().await {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_default();
                error!(group_id = %group_id, panic = %message, "group execution panicked");
                outbound.push(ControlMessage::FailedGroupId { group_id });
            }
            drop(lease);
            wake.notify_one();
        });
    }
}
