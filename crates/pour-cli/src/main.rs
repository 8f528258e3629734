//! pour - pours prebuilt bottles into a cellar

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pour_cli::{Cli, Commands, cmd};
use pour_core::{Installer, TracingReporter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; -v only raises the fallback level.
    let fallback = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .init();

    let installer = Installer::new(cli.config(), Arc::new(TracingReporter))?;

    match cli.command {
        Commands::Install {
            name,
            schedule,
            strategy,
            ..
        } => cmd::install::install(&installer, &name, schedule.into(), strategy.into()).await,
        Commands::Deps { name, strategy } => {
            cmd::deps::deps(&installer, &name, strategy.into()).await
        }
        Commands::Info { name, remote } => cmd::info::info(&installer, &name, remote).await,
        Commands::Update => cmd::update::update(&installer).await,
    }
}
