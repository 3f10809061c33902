//! Module registry: hot-loads, supersedes and unloads versioned modules.
//!
//! Each module version lives in its own working directory
//! `<work_dir>/<name>-<time>` and runs in its own execution context. Loads and
//! unloads of one module name are serialized; different names proceed
//! concurrently. Every state transition is reported to the coordinator through
//! the outbound queue.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::outbound::OutboundQueue;
use crate::domain::errors::ModuleLoadError;
use crate::domain::models::{
    ApplicationSpec, ControlMessage, ModuleFilter, ModuleManifest, ModuleState, MANIFEST_FILE_NAME,
};
use crate::domain::ports::{CoordinatorClient, PluginLauncher, PluginRuntime, RuntimeExit};

/// A started module version.
pub struct LoadedModule {
    name: String,
    module_time: i64,
    manifest: ModuleManifest,
    work_dir: PathBuf,
    runtime: Arc<dyn PluginRuntime>,
    state: AtomicU8,
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModule")
            .field("name", &self.name)
            .field("module_time", &self.module_time)
            .field("work_dir", &self.work_dir)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl LoadedModule {
    /// Module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Module version.
    pub const fn module_time(&self) -> i64 {
        self.module_time
    }

    /// Working directory holding the downloaded bundles.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Parsed manifest.
    pub const fn manifest(&self) -> &ModuleManifest {
        &self.manifest
    }

    /// Execution context.
    pub fn runtime(&self) -> &Arc<dyn PluginRuntime> {
        &self.runtime
    }

    /// Current state.
    pub fn state(&self) -> ModuleState {
        ModuleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether requests may still run against this module version.
    pub fn is_started(&self) -> bool {
        self.state() == ModuleState::Started && self.runtime.is_alive()
    }

    fn mark(&self, state: ModuleState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }
}

/// A business application resolved for execution.
#[derive(Debug, Clone)]
pub struct ResolvedApplication {
    /// Hosting module version
    pub module: Arc<LoadedModule>,
    /// Application declaration
    pub application: ApplicationSpec,
}

/// Registry view of one module name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleStatus {
    /// Module name
    pub name: String,
    /// Version of the last load attempt
    pub module_time: i64,
    /// Load state
    pub state: ModuleState,
    /// Diagnostics of the last failed load
    pub last_error: Option<String>,
}

/// What a `load` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The version was loaded and started
    Started,
    /// The same version is already loading or started
    AlreadyCurrent,
    /// A newer version is active; the request was ignored
    Outdated,
    /// The module is excluded on this worker
    Disabled,
    /// Loading failed; nothing was registered
    Failed(String),
}

#[derive(Debug, Clone)]
struct ModuleSlot {
    module_time: i64,
    state: ModuleState,
    module: Option<Arc<LoadedModule>>,
    last_error: Option<String>,
}

/// Owns every module version loaded on this worker.
pub struct ModuleRegistry {
    coordinator: Arc<dyn CoordinatorClient>,
    launcher: Arc<dyn PluginLauncher>,
    outbound: Arc<OutboundQueue>,
    work_dir: PathBuf,
    filter: ModuleFilter,
    modules: RwLock<HashMap<String, ModuleSlot>>,
    name_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    exits_tx: mpsc::UnboundedSender<RuntimeExit>,
    exits_rx: Mutex<Option<mpsc::UnboundedReceiver<RuntimeExit>>>,
}

/// Last path segment of a bundle location, without query or fragment.
fn bundle_file_name(location: &str) -> Result<String, ModuleLoadError> {
    let path = location
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_end_matches('/');
    let name = path.rsplit('/').next().unwrap_or_default();
    if name.is_empty() || name == "." || name == ".." || name.contains('\\') {
        return Err(ModuleLoadError::Manifest(format!(
            "corrupt bundle: cannot derive a file name from {location}"
        )));
    }
    Ok(name.to_string())
}

impl ModuleRegistry {
    /// Create a registry rooted at `work_dir`.
    pub fn new(
        coordinator: Arc<dyn CoordinatorClient>,
        launcher: Arc<dyn PluginLauncher>,
        outbound: Arc<OutboundQueue>,
        work_dir: PathBuf,
        filter: ModuleFilter,
    ) -> Arc<Self> {
        let (exits_tx, exits_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            coordinator,
            launcher,
            outbound,
            work_dir,
            filter,
            modules: RwLock::new(HashMap::new()),
            name_locks: Mutex::new(HashMap::new()),
            exits_tx,
            exits_rx: Mutex::new(Some(exits_rx)),
        })
    }

    /// Root working directory.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    fn read_modules(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, ModuleSlot>> {
        self.modules
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_modules(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, ModuleSlot>> {
        self.modules
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn name_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .name_locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(locks.entry(name.to_string()).or_default())
    }

    fn module_dir(&self, name: &str, module_time: i64) -> PathBuf {
        self.work_dir.join(format!("{name}-{module_time}"))
    }

    /// Spawn the task that removes modules whose execution context died.
    ///
    /// Only the first call starts a watcher.
    pub fn start_exit_watcher(self: &Arc<Self>, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        let mut rx = self
            .exits_rx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()?;
        let registry = Arc::clone(self);
        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    exit = rx.recv() => match exit {
                        Some(exit) => registry.handle_runtime_exit(exit).await,
                        None => break,
                    },
                }
            }
        }))
    }

    /// Load `name` at `module_time`.
    ///
    /// Loading the active version again is a no-op, an older version than the
    /// active one is ignored, and a newer one unloads the active version
    /// first. Failures leave nothing registered and are reported as
    /// `moduleStartFailed`.
    pub async fn load(&self, name: &str, module_time: i64) -> LoadOutcome {
        if !self.filter.allows(name) {
            info!(module_name = name, module_time, "module excluded on this worker");
            self.outbound.push(ControlMessage::ModuleDisabled {
                module_name: name.to_string(),
                module_time,
            });
            return LoadOutcome::Disabled;
        }

        let lock = self.name_lock(name);
        let _guard = lock.lock().await;

        let current = self.read_modules().get(name).cloned();
        if let Some(slot) = current {
            match slot.state {
                ModuleState::Loading | ModuleState::Started if slot.module_time == module_time => {
                    debug!(module_name = name, module_time, "module version already current");
                    return LoadOutcome::AlreadyCurrent;
                }
                ModuleState::Loading | ModuleState::Started if slot.module_time > module_time => {
                    info!(
                        module_name = name,
                        module_time,
                        active_time = slot.module_time,
                        "ignoring start of an older module version"
                    );
                    return LoadOutcome::Outdated;
                }
                ModuleState::Started => {
                    info!(
                        module_name = name,
                        module_time = slot.module_time,
                        "unloading older module version"
                    );
                    self.unload_locked(name, None).await;
                }
                _ => {}
            }
        }

        self.write_modules().insert(
            name.to_string(),
            ModuleSlot {
                module_time,
                state: ModuleState::Loading,
                module: None,
                last_error: None,
            },
        );

        let dir = self.module_dir(name, module_time);
        match self.start_module(name, module_time, &dir).await {
            Ok(module) => {
                info!(
                    module_name = name,
                    module_time,
                    applications = module.manifest.applications.len(),
                    "module started"
                );
                self.write_modules().insert(
                    name.to_string(),
                    ModuleSlot {
                        module_time,
                        state: ModuleState::Started,
                        module: Some(module),
                        last_error: None,
                    },
                );
                self.outbound.push(ControlMessage::ModuleStarted {
                    module_name: name.to_string(),
                    module_time,
                });
                LoadOutcome::Started
            }
            Err(e) => {
                let diagnostics = e.to_string();
                error!(module_name = name, module_time, error = %diagnostics, "unable to load module");
                remove_dir_logged(&dir).await;
                self.write_modules().insert(
                    name.to_string(),
                    ModuleSlot {
                        module_time,
                        state: ModuleState::Failed,
                        module: None,
                        last_error: Some(diagnostics.clone()),
                    },
                );
                self.outbound.push(ControlMessage::ModuleStartFailed {
                    module_name: name.to_string(),
                    module_time,
                    module_error: diagnostics.clone(),
                });
                LoadOutcome::Failed(diagnostics)
            }
        }
    }

    async fn start_module(
        &self,
        name: &str,
        module_time: i64,
        dir: &Path,
    ) -> Result<Arc<LoadedModule>, ModuleLoadError> {
        if tokio::fs::try_exists(dir).await? {
            tokio::fs::remove_dir_all(dir).await?;
        }
        tokio::fs::create_dir_all(dir).await?;

        let locations = self.coordinator.module_bundles(name, module_time).await?;
        if locations.is_empty() {
            return Err(ModuleLoadError::Manifest(format!(
                "module {name} has no bundles"
            )));
        }

        let mut seen = HashSet::new();
        for location in &locations {
            let file_name = bundle_file_name(location)?;
            if !seen.insert(file_name.clone()) {
                return Err(ModuleLoadError::Manifest(format!(
                    "corrupt bundle: more than one bundle named {file_name}"
                )));
            }
            debug!(module_name = name, module_time, bundle = %location, "downloading bundle");
            self.coordinator
                .download_bundle(location, &dir.join(&file_name))
                .await?;
        }

        let manifest_path = dir.join(MANIFEST_FILE_NAME);
        let text = tokio::fs::read_to_string(&manifest_path)
            .await
            .map_err(|e| {
                ModuleLoadError::Manifest(format!("unable to read {MANIFEST_FILE_NAME}: {e}"))
            })?;
        let manifest = ModuleManifest::parse(&text, name).map_err(ModuleLoadError::Manifest)?;

        let runtime = self
            .launcher
            .launch(&manifest, module_time, dir, self.exits_tx.clone())
            .await?;

        Ok(Arc::new(LoadedModule {
            name: name.to_string(),
            module_time,
            manifest,
            work_dir: dir.to_path_buf(),
            runtime,
            state: AtomicU8::new(ModuleState::Started.as_u8()),
        }))
    }

    /// Unload `name` if its active version matches `module_time` (any
    /// version when `None`). Returns whether a module was unloaded.
    pub async fn stop(&self, name: &str, module_time: Option<i64>) -> bool {
        let lock = self.name_lock(name);
        let _guard = lock.lock().await;
        self.unload_locked(name, module_time).await
    }

    /// Unload whatever version of `name` is active.
    pub async fn unload(&self, name: &str) -> bool {
        self.stop(name, None).await
    }

    async fn unload_locked(&self, name: &str, module_time: Option<i64>) -> bool {
        let removed = {
            let mut modules = self.write_modules();
            match modules.get(name) {
                Some(slot) if module_time.is_none_or(|t| t == slot.module_time) => {
                    modules.remove(name)
                }
                _ => None,
            }
        };
        let Some(slot) = removed else {
            return false;
        };
        let Some(module) = slot.module else {
            // a failed load left nothing to release
            return false;
        };

        module.mark(ModuleState::Stopped);
        module.runtime.shutdown().await;
        remove_dir_logged(&module.work_dir).await;
        info!(module_name = name, module_time = module.module_time, "module stopped");
        self.outbound.push(ControlMessage::ModuleStopped {
            module_name: name.to_string(),
            module_time: module.module_time,
        });
        true
    }

    async fn handle_runtime_exit(&self, exit: RuntimeExit) {
        let lock = self.name_lock(&exit.module_name);
        let _guard = lock.lock().await;

        let removed = {
            let mut modules = self.write_modules();
            match modules.get(&exit.module_name) {
                Some(slot)
                    if slot.module_time == exit.module_time && slot.module.is_some() =>
                {
                    modules.remove(&exit.module_name)
                }
                _ => None,
            }
        };
        let Some(module) = removed.and_then(|slot| slot.module) else {
            debug!(
                module_name = %exit.module_name,
                module_time = exit.module_time,
                "exit of a module version that is no longer active"
            );
            return;
        };

        warn!(
            module_name = %exit.module_name,
            module_time = exit.module_time,
            "module execution context died, excluding module"
        );
        module.mark(ModuleState::Stopped);
        module.runtime.shutdown().await;
        remove_dir_logged(&module.work_dir).await;
        self.outbound.push(ControlMessage::ModuleExcluded {
            module_name: exit.module_name,
            module_time: exit.module_time,
            module_error: exit.diagnostics,
        });
    }

    /// Resolve a business application; `None` if the module is absent, still
    /// loading, failed, or does not host the application.
    pub fn resolve(&self, module_name: &str, application_name: &str) -> Option<ResolvedApplication> {
        let module = self
            .read_modules()
            .get(module_name)
            .filter(|slot| slot.state == ModuleState::Started)
            .and_then(|slot| slot.module.clone())?;
        if !module.is_started() {
            return None;
        }
        let application = module
            .manifest
            .applications
            .iter()
            .find(|app| app.name == application_name)?
            .clone();
        Some(ResolvedApplication {
            module,
            application,
        })
    }

    /// Registry view of one module name.
    pub fn status(&self, name: &str) -> Option<ModuleStatus> {
        self.read_modules().get(name).map(|slot| ModuleStatus {
            name: name.to_string(),
            module_time: slot.module_time,
            state: slot.state,
            last_error: slot.last_error.clone(),
        })
    }

    /// Names of the started modules, sorted.
    pub fn started_module_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .read_modules()
            .iter()
            .filter(|(_, slot)| slot.state == ModuleState::Started)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Unload every module.
    pub async fn unload_all(&self) {
        let names: Vec<String> = self.read_modules().keys().cloned().collect();
        for name in names {
            self.unload(&name).await;
        }
    }
}

async fn remove_dir_logged(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(dir = %dir.display(), error = %e, "unable to remove module directory"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundle_file_name() {
        assert_eq!(
            bundle_file_name("/worker/modules/geo/100/bundles/module.toml?x=1").unwrap(),
            "module.toml"
        );
        assert_eq!(
            bundle_file_name("https://cdn.example.com/geo/plugin.sh").unwrap(),
            "plugin.sh"
        );
        assert!(bundle_file_name("").is_err());
        assert!(bundle_file_name("/a/..").is_err());
    }
}
