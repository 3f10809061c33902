//! Worker assembly: builds every component from [`Config`] and runs them
//! until shutdown.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::control_router::ControlRouter;
use super::executing_groups::ExecutingGroups;
use super::worker_scheduler::{SchedulerSettings, WorkerScheduler};
use crate::domain::errors::ChannelError;
use crate::domain::models::{
    Config, ConfigPropertyRecord, ControlMessage, ModuleFilter, SecurityQuery,
};
use crate::domain::ports::{ConfigBackend, CoordinatorClient, PluginLauncher, SecurityBackend};
use crate::infrastructure::control_channel::{ChannelSettings, ControlChannel, ReconnectPolicy};
use crate::infrastructure::coordinator::{HttpCoordinatorClient, RequestSigner};
use crate::infrastructure::plugins::{BuiltinPlugins, ProcessTimeouts, RuntimeLauncher};
use crate::services::{
    ConfigPropertyLoader, GroupExecutor, ModuleRegistry, OutboundQueue, SecurityCache,
};

const FINAL_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Backend used when the control channel is disabled: every security
/// lookup is denied and modules have no configuration properties.
struct NoChannel;

#[async_trait]
impl SecurityBackend for NoChannel {
    fn is_connected(&self) -> bool {
        false
    }

    async fn security_query(
        &self,
        _module_name: &str,
        _user_id: &str,
        _query: SecurityQuery,
    ) -> Result<Value, ChannelError> {
        Err(ChannelError::NotConnected)
    }
}

#[async_trait]
impl ConfigBackend for NoChannel {
    fn is_connected(&self) -> bool {
        false
    }

    async fn module_config(
        &self,
        _environment_name: &str,
        _module_name: &str,
        _component_name: &str,
    ) -> Result<Vec<ConfigPropertyRecord>, ChannelError> {
        Err(ChannelError::NotConnected)
    }
}

/// Default worker id: `<environment>:<host>:<pid>`.
pub fn default_worker_id(environment: &str) -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "localhost".to_string());
    format!("{environment}:{host}:{}", std::process::id())
}

/// A fully wired worker.
pub struct Worker {
    worker_id: String,
    work_dir: PathBuf,
    coordinator: Arc<dyn CoordinatorClient>,
    outbound: Arc<OutboundQueue>,
    registry: Arc<ModuleRegistry>,
    groups: Arc<ExecutingGroups>,
    router: Arc<ControlRouter>,
    scheduler: Arc<WorkerScheduler>,
    channel: Option<Arc<ControlChannel>>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<ControlMessage>>>,
}

impl Worker {
    /// Build a worker talking to the coordinator over HTTP.
    pub fn build(config: &Config, builtins: BuiltinPlugins) -> Result<Self> {
        let worker_id = Self::worker_id(config);
        let signer = RequestSigner::new(&config.coordinator.username, &config.coordinator.secret)
            .map_err(|e| anyhow::anyhow!("invalid worker secret: {e}"))?;
        let coordinator = HttpCoordinatorClient::new(
            &config.coordinator.url,
            worker_id.clone(),
            signer,
            config.coordinator.request_timeout(),
        )?;
        let launcher = RuntimeLauncher::new(
            Arc::new(builtins),
            ProcessTimeouts {
                request: config.plugins.request_timeout(),
                shutdown_grace: config.plugins.shutdown_grace(),
            },
        );
        Self::assemble(config, Arc::new(coordinator), Arc::new(launcher))
    }

    /// Build a worker on explicit coordinator and launcher implementations.
    pub fn assemble(
        config: &Config,
        coordinator: Arc<dyn CoordinatorClient>,
        launcher: Arc<dyn PluginLauncher>,
    ) -> Result<Self> {
        let worker_id = Self::worker_id(config);
        let base_dir = config
            .worker
            .work_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let work_dir = base_dir.join(format!("worker_{}", worker_id.replace(':', "_")));

        let outbound = Arc::new(OutboundQueue::new());
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let channel = if config.control_channel.enabled {
            let signer =
                RequestSigner::new(&config.coordinator.username, &config.coordinator.secret)
                    .map_err(|e| anyhow::anyhow!("invalid worker secret: {e}"))?;
            let cc = &config.control_channel;
            let settings = ChannelSettings {
                address: cc.address.clone(),
                path: cc.path.clone(),
                worker_id: worker_id.clone(),
                round_trip_timeout: cc.round_trip_timeout(),
                reconnect: ReconnectPolicy {
                    step: Duration::from_secs(cc.reconnect_step_secs),
                    max: Duration::from_secs(cc.reconnect_max_secs),
                    healthy_reset: Duration::from_secs(cc.healthy_reset_secs),
                    error_log_cooldown: Duration::from_secs(cc.error_log_cooldown_secs),
                },
            };
            Some(ControlChannel::new(
                settings,
                signer,
                inbound_tx,
                CancellationToken::new(),
            ))
        } else {
            None
        };
        let (backend, config_backend): (Arc<dyn SecurityBackend>, Arc<dyn ConfigBackend>) =
            match &channel {
                Some(channel) => (
                    Arc::clone(channel) as Arc<dyn SecurityBackend>,
                    Arc::clone(channel) as Arc<dyn ConfigBackend>,
                ),
                None => (Arc::new(NoChannel), Arc::new(NoChannel)),
            };

        let registry = ModuleRegistry::new(
            Arc::clone(&coordinator),
            launcher,
            Arc::clone(&outbound),
            work_dir.clone(),
            ModuleFilter::from_names(&config.worker.module_names),
        );
        let security = SecurityCache::new(backend);
        let groups = ExecutingGroups::new();
        let wake = Arc::new(Notify::new());
        let router = ControlRouter::new(
            Arc::clone(&registry),
            Arc::clone(&security),
            Arc::clone(&groups),
            Arc::clone(&wake),
        );
        let config_properties =
            ConfigPropertyLoader::new(config_backend, config.worker.environment.clone());
        let executor = Arc::new(
            GroupExecutor::new(
                Arc::clone(&coordinator),
                Arc::clone(&registry),
                security,
                Arc::clone(&outbound),
                Some(work_dir.join("spool")),
            )
            .with_config_properties(config_properties),
        );

        let settings = SchedulerSettings {
            worker_id: worker_id.clone(),
            worker_start_time: chrono::Utc::now().timestamp_millis(),
            max_concurrent_groups: config.worker.max_concurrent_groups,
            mode: config.dispatch.mode,
            backoff_step: config.dispatch.backoff_step(),
            max_backoff: config.dispatch.max_backoff(),
            heartbeat_interval: config.worker.heartbeat_interval(),
            drain_timeout: config.plugins.shutdown_grace(),
        };
        let scheduler = Arc::new(WorkerScheduler::new(
            settings,
            Arc::clone(&coordinator),
            Arc::clone(&registry),
            executor,
            Arc::clone(&outbound),
            Arc::clone(&groups),
            Arc::clone(&router),
            wake,
        ));

        Ok(Self {
            worker_id,
            work_dir,
            coordinator,
            outbound,
            registry,
            groups,
            router,
            scheduler,
            channel,
            inbound_rx: Mutex::new(Some(inbound_rx)),
        })
    }

    fn worker_id(config: &Config) -> String {
        config
            .worker
            .id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| default_worker_id(&config.worker.environment))
    }

    /// This worker's id.
    pub fn id(&self) -> &str {
        &self.worker_id
    }

    /// Working directory holding module versions and result spools.
    pub fn work_dir(&self) -> &std::path::Path {
        &self.work_dir
    }

    /// Module registry.
    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    /// Executing group set.
    pub fn executing_groups(&self) -> &Arc<ExecutingGroups> {
        &self.groups
    }

    /// Control message router.
    pub fn router(&self) -> &Arc<ControlRouter> {
        &self.router
    }

    /// Scheduling loop.
    pub fn scheduler(&self) -> &Arc<WorkerScheduler> {
        &self.scheduler
    }

    /// Control channel, when enabled.
    pub fn channel(&self) -> Option<&Arc<ControlChannel>> {
        self.channel.as_ref()
    }

    /// Run until `shutdown` is cancelled, then stop every component and
    /// remove the working directory.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.work_dir.display()))?;
        info!(worker_id = %self.worker_id, work_dir = %self.work_dir.display(), "worker starting");

        let channel_task = self.channel.as_ref().map(ControlChannel::start);
        let inbound = self
            .inbound_rx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        let router_task = inbound.map(|rx| self.router.start(rx, shutdown.clone()));
        let exit_watcher = self.registry.start_exit_watcher(shutdown.clone());

        self.scheduler.run(shutdown.clone()).await;

        info!("worker shutting down");
        if let Some(channel) = &self.channel {
            channel.shutdown();
        }
        self.registry.unload_all().await;

        let flush_token = CancellationToken::new();
        let flush = self.outbound.flush(
            &self.coordinator,
            crate::services::AdaptiveBackoff::new(Duration::from_millis(200), Duration::from_secs(1)),
            &flush_token,
        );
        if tokio::time::timeout(FINAL_FLUSH_TIMEOUT, flush).await.is_err() {
            flush_token.cancel();
            warn!(pending = self.outbound.len(), "unsent messages dropped at shutdown");
        }

        for task in [channel_task, router_task, exit_watcher].into_iter().flatten() {
            if let Err(e) = task.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }

        if let Err(e) = tokio::fs::remove_dir_all(&self.work_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(work_dir = %self.work_dir.display(), error = %e, "unable to remove working directory");
            }
        }
        info!(worker_id = %self.worker_id, "worker stopped");
        Ok(())
    }
}
