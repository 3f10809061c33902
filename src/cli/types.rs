//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Parser, Subcommand};

use super::commands::config::ConfigArgs;
use super::commands::run::RunArgs;
use super::commands::sign::SignArgs;

#[derive(Parser)]
#[command(name = "groupworker")]
#[command(about = "groupworker - distributed batch job worker", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the worker until interrupted
    Run(RunArgs),

    /// Inspect the effective configuration
    Config(ConfigArgs),

    /// Print the signature for a coordinator path
    Sign(SignArgs),
}
