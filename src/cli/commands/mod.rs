pub mod logging;
pub mod run;
pub mod serve;

pub use logging::LoggingConfig;
pub use run::RunCommand;
pub use serve::ServeCommand;

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Start the inference server and accept jobs over HTTP
    Serve(ServeCommand),
    /// Start the inference server, handle one job from a file, and exit
    Run(RunCommand),
}
