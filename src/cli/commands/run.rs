//! Implementation of the `groupworker run` command.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use crate::application::{install_shutdown_handler, Worker};
use crate::domain::models::{Config, DispatchMode};
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::logging::LoggerImpl;
use crate::infrastructure::plugins::BuiltinPlugins;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Configuration file (defaults to .groupworker/config.yaml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override worker.max_concurrent_groups
    #[arg(short = 'n', long)]
    pub max_concurrent_groups: Option<usize>,

    /// Override dispatch.mode (poll or push)
    #[arg(short, long)]
    pub mode: Option<DispatchMode>,
}

/// Load the configuration named by `path` and apply command-line overrides.
pub fn load_config(
    path: Option<&std::path::Path>,
    max_concurrent_groups: Option<usize>,
    mode: Option<DispatchMode>,
) -> Result<Config> {
    let mut config = ConfigLoader::extract(path)?;
    if let Some(n) = max_concurrent_groups {
        config.worker.max_concurrent_groups = n;
    }
    if let Some(mode) = mode {
        config.dispatch.mode = mode;
    }
    ConfigLoader::validate(&config).context("Invalid configuration")?;
    Ok(config)
}

pub async fn execute(args: RunArgs, _json_mode: bool) -> Result<()> {
    let config = load_config(args.config.as_deref(), args.max_concurrent_groups, args.mode)?;
    let worker = Worker::build(&config, BuiltinPlugins::new())?;
    let _logger = LoggerImpl::init(&config.logging, worker.id())?;

    info!(
        worker_id = %worker.id(),
        coordinator = %config.coordinator.url,
        "starting groupworker"
    );
    let shutdown = install_shutdown_handler();
    worker.run(shutdown).await
}
