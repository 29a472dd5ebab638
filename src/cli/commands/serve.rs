use clap::Args;

#[derive(Args)]
pub struct ServeCommand {
    /// Listen address in host:port format
    #[arg(long, value_name = "HOST:PORT", env = "SGLANG_WORKER_LISTEN")]
    pub listen: Option<String>,
}
