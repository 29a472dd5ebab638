//! Command-line interface module.
//!
//! This module provides the CLI functionality for:
//! - Running the worker as a long-lived job server
//! - Handling a single job from a file (local test input)

pub mod commands;
pub mod handlers;

pub use handlers::{handle_run, handle_serve};

use clap::Parser;
use std::path::PathBuf;

use crate::cli::commands::{Commands, LoggingConfig};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub logging: LoggingConfig,
}
