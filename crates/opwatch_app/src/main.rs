//! `opwatch`: follow, cancel and re-attach to long-running backend operations.
mod commands;
mod config;
mod console;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use opwatch_core::MonitorOutcome;

use crate::config::{AppConfig, DEFAULT_CONFIG_FILE};

#[derive(Debug, Parser)]
#[command(name = "opwatch", version, about = "Follow long-running backend operations")]
struct Cli {
    /// Path to the RON configuration file.
    #[arg(long, short, env = "OPWATCH_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Overrides the backend base URL from the configuration.
    #[arg(long, env = "OPWATCH_BASE_URL")]
    base_url: Option<String>,
    /// Poll only, never open a push stream.
    #[arg(long)]
    no_push: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Follow one operation until it finishes.
    Watch { kind: String, operation_id: String },
    /// Ask the server to cancel an operation.
    Cancel { kind: String, operation_id: String },
    /// Resume following every configured kind that is still running.
    Reattach,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("opwatch: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = AppConfig::load(&cli.config)?;
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }
    if cli.no_push {
        config.push_enabled = false;
    }
    logging::initialize(config.log_destination, config.log_level()?);

    let settings = config.to_settings();
    match cli.command {
        Command::Watch { kind, operation_id } => {
            let outcome = commands::watch(settings, &kind, &operation_id).await?;
            Ok(exit_code(&[outcome]))
        }
        Command::Cancel { kind, operation_id } => {
            let accepted = commands::cancel(settings, &kind, &operation_id)
                .await
                .context("cancel command failed")?;
            Ok(if accepted {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Reattach => {
            let outcomes = commands::reattach(settings, &config.kind_names()).await?;
            Ok(exit_code(&outcomes))
        }
    }
}

fn exit_code(outcomes: &[MonitorOutcome]) -> ExitCode {
    if outcomes.contains(&MonitorOutcome::Failed) {
        ExitCode::from(1)
    } else if outcomes.contains(&MonitorOutcome::Abandoned) {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    }
}
