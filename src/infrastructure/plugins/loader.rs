//! Starts the execution context a module manifest declares.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::builtin::BuiltinPlugins;
use super::process::{ProcessRuntime, ProcessTimeouts};
use crate::domain::errors::ModuleLoadError;
use crate::domain::models::{ModuleManifest, RuntimeSpec};
use crate::domain::ports::{PluginLauncher, PluginRuntime, RuntimeExit};

/// [`PluginLauncher`] covering builtin and child-process runtimes.
#[derive(Debug, Clone)]
pub struct RuntimeLauncher {
    builtins: Arc<BuiltinPlugins>,
    timeouts: ProcessTimeouts,
}

impl RuntimeLauncher {
    /// Launcher resolving builtin entries against `builtins`.
    pub const fn new(builtins: Arc<BuiltinPlugins>, timeouts: ProcessTimeouts) -> Self {
        Self { builtins, timeouts }
    }
}

#[async_trait]
impl PluginLauncher for RuntimeLauncher {
    async fn launch(
        &self,
        manifest: &ModuleManifest,
        module_time: i64,
        work_dir: &Path,
        exits: mpsc::UnboundedSender<RuntimeExit>,
    ) -> Result<Arc<dyn PluginRuntime>, ModuleLoadError> {
        match &manifest.runtime {
            RuntimeSpec::Builtin { entry } => {
                let runtime = self.builtins.runtime_for(entry, manifest)?;
                Ok(Arc::new(runtime))
            }
            RuntimeSpec::Process { command, args } => {
                let runtime = ProcessRuntime::spawn(
                    &manifest.name,
                    module_time,
                    work_dir,
                    command,
                    args,
                    self.timeouts,
                    exits,
                )?;
                Ok(runtime)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ApplicationSpec;
    use std::time::Duration;

    fn launcher() -> RuntimeLauncher {
        RuntimeLauncher::new(
            Arc::new(BuiltinPlugins::new()),
            ProcessTimeouts {
                request: Duration::from_secs(5),
                shutdown_grace: Duration::from_secs(1),
            },
        )
    }

    #[tokio::test]
    async fn test_unknown_builtin_entry_fails() {
        let manifest = ModuleManifest {
            name: "geo".into(),
            runtime: RuntimeSpec::Builtin {
                entry: "missing".into(),
            },
            applications: vec![ApplicationSpec::new("point")],
        };
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = launcher().launch(&manifest, 1, dir.path(), tx).await;
        assert!(matches!(result, Err(ModuleLoadError::Runtime(_))));
    }

    #[tokio::test]
    async fn test_missing_process_executable_fails() {
        let manifest = ModuleManifest {
            name: "geo".into(),
            runtime: RuntimeSpec::Process {
                command: "bin/geo-plugin".into(),
                args: Vec::new(),
            },
            applications: vec![ApplicationSpec::new("point")],
        };
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = launcher().launch(&manifest, 1, dir.path(), tx).await;
        assert!(matches!(result, Err(ModuleLoadError::Runtime(_))));
    }
}
