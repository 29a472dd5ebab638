use clap::Args;
use std::path::PathBuf;

#[derive(Args)]
pub struct RunCommand {
    /// JSON file holding one job: {"id": ..., "input": {"prompt": ...}}
    #[arg(long, value_name = "FILE", default_value = "test_input.json")]
    pub input: PathBuf,
}
