mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};
use jobfront::logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize structured logging
    logging::init(cli.command.common().log_level.as_deref());

    // Dispatch to appropriate command handler
    match cli.command {
        Commands::Serve(args) => commands::serve::run(args).await,
        Commands::Run(args) => commands::run::run(args),
        Commands::List(args) => commands::list::run(args),
    }
}
