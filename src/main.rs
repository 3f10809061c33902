//! groupworker CLI entry point.

use clap::Parser;

use groupworker::cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run(args) => groupworker::cli::commands::run::execute(args, cli.json).await,
        Commands::Config(args) => groupworker::cli::commands::config::execute(args, cli.json),
        Commands::Sign(args) => groupworker::cli::commands::sign::execute(args, cli.json),
    };

    if let Err(err) = result {
        groupworker::cli::handle_error(err, cli.json);
    }
}
