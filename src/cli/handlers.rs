//! Handlers for CLI subcommands.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::commands::{RunCommand, ServeCommand};
use crate::config::WorkerConfig;
use crate::lifecycle::{run_once, run_service, Worker};
use crate::server::{Job, JobOutput};

/// Run the worker until SIGTERM/SIGINT.
pub async fn handle_serve(config_path: Option<&Path>, cmd: ServeCommand) -> Result<()> {
    let mut config = WorkerConfig::load(config_path).context("failed to load configuration")?;
    if let Some(listen) = cmd.listen {
        config.listen = listen;
    }
    let listen = config.listen_addr()?;

    info!(listen = %listen, "Configuration loaded");
    let worker = Worker::new(config)?;
    run_service(worker, listen).await?;
    Ok(())
}

/// Handle the single job in `cmd.input` and print its output as JSON.
pub async fn handle_run(config_path: Option<&Path>, cmd: RunCommand) -> Result<()> {
    let config = WorkerConfig::load(config_path).context("failed to load configuration")?;

    let contents = tokio::fs::read_to_string(&cmd.input)
        .await
        .with_context(|| format!("failed to read {}", cmd.input.display()))?;
    let job: Job = serde_json::from_str(&contents)
        .with_context(|| format!("{} is not a valid job", cmd.input.display()))?;

    info!(job_id = ?job.id, input = %cmd.input.display(), "Running single job");
    let worker = Worker::new(config)?;
    let output = run_once(worker, &job.input).await?;

    let output = JobOutput { id: job.id, output };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
