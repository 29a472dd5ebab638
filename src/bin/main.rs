//! sglang-worker binary.
//!
//! This binary launches a local SGLang inference server, waits until it is
//! ready, and serves generation jobs against it until it is told to stop.

use clap::Parser;
use sglang_worker_core::cli::{commands::Commands, handle_run, handle_serve, Cli};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = cli.logging.get_effective_level();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.parse().unwrap_or(Level::INFO).into())
                .parse_lossy(cli.logging.log_filter.as_deref().unwrap_or("")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("sglang-worker {} starting up", env!("CARGO_PKG_VERSION"));

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Serve(cmd) => handle_serve(config_path, cmd).await?,
        Commands::Run(cmd) => handle_run(config_path, cmd).await?,
    }

    info!("sglang-worker exited cleanly");
    Ok(())
}
