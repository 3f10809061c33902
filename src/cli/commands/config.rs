//! Implementation of the `groupworker config` commands.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;

use super::run::load_config;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;

const REDACTED: &str = "********";

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective, validated configuration
    Show {
        /// Configuration file (defaults to .groupworker/config.yaml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct ConfigOutput {
    config: Config,
}

impl ConfigOutput {
    /// Wrap `config` with its secret redacted.
    pub fn redacted(mut config: Config) -> Self {
        if !config.coordinator.secret.is_empty() {
            config.coordinator.secret = REDACTED.to_string();
        }
        Self { config }
    }
}

impl CommandOutput for ConfigOutput {
    fn to_human(&self) -> String {
        serde_yaml::to_string(&self.config).unwrap_or_default()
    }
}

pub fn execute(args: ConfigArgs, json_mode: bool) -> Result<()> {
    match args.command {
        ConfigCommands::Show { config } => {
            let config = load_config(config.as_deref(), None, None)
                .context("Failed to load configuration")?;
            output(&ConfigOutput::redacted(config), json_mode);
            Ok(())
        }
    }
}
