//! Stratum command-line tool.
//!
//! Applies migrations from a source location to a store location.
//! Ctrl-C stops the run after the migration in progress finishes.

mod commands;
mod config;

use clap::Parser;
use stratum_core::{CancellationToken, Migrator};

use crate::commands::CliError;
use crate::config::{Args, CliConfig};

#[tokio::main]
async fn main() {
    let config = Args::parse().into_config();

    let default_level = if config.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("stratum={default_level}").parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(config).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: CliConfig) -> Result<(), CliError> {
    if let Some(question) = config.confirm {
        if !commands::confirm(question)? {
            println!("aborted");
            return Ok(());
        }
    }

    let registry = commands::registry()?;
    let token = CancellationToken::new();
    let migrator = Migrator::open(&registry, &config.source, &config.database)
        .await?
        .with_cancellation(token.clone());

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl+c");
            return;
        }
        tracing::warn!("stopping after the current migration");
        token.cancel();
    });

    let mut stdout = std::io::stdout();
    let outcome = commands::execute(&migrator, config.action, config.dry_run, &mut stdout).await;
    if let Err(e) = migrator.close().await {
        tracing::warn!(error = %e, "failed to close migrator");
    }
    outcome
}
