//! Configuration management for the worker.
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults
//! 2. An optional configuration file (TOML, JSON or YAML by extension)
//! 3. Environment variables prefixed with `SGLANG_WORKER__`
//! 4. The `NUM_GPUS` variable, kept for compatibility with existing deployments
//!
//! # Environment Variables
//!
//! - `NUM_GPUS` - tensor-parallel degree passed to the inference server
//! - `SGLANG_WORKER__MODEL` - model identifier served by the inference server
//! - `SGLANG_WORKER__SERVER_PORT` - loopback port of the inference server
//! - `SGLANG_WORKER__STARTUP_TIMEOUT_SECS` - readiness wait upper bound

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, WorkerError};
use crate::supervisor::{LaunchConfig, ReadinessPolicy};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "SGLANG_WORKER";

/// Legacy variable holding the parallelism degree.
pub const NUM_GPUS_VAR: &str = "NUM_GPUS";

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Model identifier served by the inference server
    #[serde(default = "default_model")]
    pub model: String,

    /// Tensor-parallel degree (number of GPUs to shard across)
    #[serde(default = "default_num_gpus")]
    pub num_gpus: u32,

    #[serde(default = "default_server_host")]
    pub server_host: String,

    #[serde(default = "default_server_port")]
    pub server_port: u16,

    /// Allow the model repository to run its own code
    #[serde(default = "default_true")]
    pub trust_remote_code: bool,

    /// Python interpreter used to launch the server
    #[serde(default = "default_python")]
    pub python: String,

    #[serde(default = "default_launch_module")]
    pub launch_module: String,

    /// Additional flags appended to the launch command
    #[serde(default)]
    pub extra_args: Vec<String>,

    // Readiness
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Emit a progress log every N readiness polls
    #[serde(default = "default_progress_every")]
    pub progress_every: u32,

    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    // Shutdown and requests
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,

    #[serde(default = "default_generate_timeout_secs")]
    pub generate_timeout_secs: u64,

    /// Address the job server listens on
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_model() -> String {
    "deepseek-ai/DeepSeek-R1-Distill-Qwen-32B".to_string()
}
fn default_num_gpus() -> u32 {
    2
}
fn default_server_host() -> String {
    "127.0.0.1".to_string()
}
fn default_server_port() -> u16 {
    30000
}
fn default_true() -> bool {
    true
}
fn default_python() -> String {
    "python3".to_string()
}
fn default_launch_module() -> String {
    "sglang.launch_server".to_string()
}
fn default_startup_timeout_secs() -> u64 {
    1800
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_progress_every() -> u32 {
    10
}
fn default_probe_timeout_secs() -> u64 {
    5
}
fn default_stop_timeout_secs() -> u64 {
    30
}
fn default_generate_timeout_secs() -> u64 {
    600
}
fn default_listen() -> String {
    "0.0.0.0:8000".to_string()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            num_gpus: default_num_gpus(),
            server_host: default_server_host(),
            server_port: default_server_port(),
            trust_remote_code: true,
            python: default_python(),
            launch_module: default_launch_module(),
            extra_args: Vec::new(),
            startup_timeout_secs: default_startup_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            progress_every: default_progress_every(),
            probe_timeout_secs: default_probe_timeout_secs(),
            stop_timeout_secs: default_stop_timeout_secs(),
            generate_timeout_secs: default_generate_timeout_secs(),
            listen: default_listen(),
        }
    }
}

impl WorkerConfig {
    /// Load configuration from defaults, an optional file and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_from(path, std::env::vars().collect())
    }

    /// Load configuration against an explicit set of environment variables.
    pub fn load_from(path: Option<&Path>, vars: HashMap<String, String>) -> Result<Self> {
        let num_gpus = vars.get(NUM_GPUS_VAR).cloned();

        let mut builder = Config::builder().add_source(Config::try_from(&WorkerConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(" ")
                    .with_list_parse_key("extra_args")
                    .try_parsing(true)
                    .source(Some(vars.into_iter().collect())),
            )
            .set_override_option("num_gpus", num_gpus)?
            .build()?;

        let config: WorkerConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the supervisor cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(WorkerError::config("model must not be empty"));
        }
        if self.num_gpus == 0 {
            return Err(WorkerError::config("num_gpus must be at least 1"));
        }
        if self.server_port == 0 {
            return Err(WorkerError::config("server_port must not be 0"));
        }
        if self.startup_timeout_secs == 0
            || self.poll_interval_ms == 0
            || self.probe_timeout_secs == 0
            || self.stop_timeout_secs == 0
            || self.generate_timeout_secs == 0
        {
            return Err(WorkerError::config("timeouts and intervals must be non-zero"));
        }
        if self.progress_every == 0 {
            return Err(WorkerError::config("progress_every must be at least 1"));
        }
        self.listen_addr()?;
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen
            .parse()
            .map_err(|e| WorkerError::config(format!("invalid listen address {:?}: {}", self.listen, e)))
    }

    /// Base URL of the inference server.
    pub fn server_url(&self) -> String {
        format!("http://{}:{}", self.server_host, self.server_port)
    }

    /// Launch description for the inference server.
    pub fn launch_config(&self) -> LaunchConfig {
        let mut launch = LaunchConfig::sglang(
            &self.python,
            &self.launch_module,
            &self.model,
            self.num_gpus,
            &self.server_host,
            self.server_port,
        );
        if self.trust_remote_code {
            launch = launch.arg("--trust-remote-code");
        }
        for extra in &self.extra_args {
            launch = launch.arg(extra.as_str());
        }
        launch
    }

    pub fn readiness_policy(&self) -> ReadinessPolicy {
        ReadinessPolicy {
            timeout: Duration::from_secs(self.startup_timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            progress_every: self.progress_every,
            probe_timeout: Duration::from_secs(self.probe_timeout_secs),
        }
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn generate_timeout(&self) -> Duration {
        Duration::from_secs(self.generate_timeout_secs)
    }
}
