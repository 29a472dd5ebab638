//! Launch description for the inference server process.

use std::fmt;
use std::path::PathBuf;

/// Configuration for spawning the inference server.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Human-readable name used to tag logs.
    pub name: String,

    /// Path to the executable.
    pub executable: PathBuf,

    /// Command-line arguments.
    pub args: Vec<String>,

    /// Working directory.
    pub working_dir: Option<PathBuf>,

    /// Environment variables (key=value).
    pub env: Vec<(String, String)>,

    /// Model identifier, when launching a model server.
    pub model: Option<String>,

    /// Tensor-parallel degree passed to the server.
    pub parallelism: Option<u32>,

    /// Address the server binds to.
    pub bind: Option<(String, u16)>,
}

impl LaunchConfig {
    /// Create a new launch configuration.
    pub fn new(name: impl Into<String>, executable: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            executable: executable.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            model: None,
            parallelism: None,
            bind: None,
        }
    }

    /// Launch an SGLang server via `python -m <module>`.
    pub fn sglang(
        python: &str,
        module: &str,
        model: &str,
        parallelism: u32,
        host: &str,
        port: u16,
    ) -> Self {
        let mut config = Self::new("sglang", python).args([
            "-m".to_string(),
            module.to_string(),
            "--model-path".to_string(),
            model.to_string(),
            "--tp".to_string(),
            parallelism.to_string(),
            "--host".to_string(),
            host.to_string(),
            "--port".to_string(),
            port.to_string(),
        ]);
        config.model = Some(model.to_string());
        config.parallelism = Some(parallelism);
        config.bind = Some((host.to_string(), port));
        config
    }

    /// Set command-line arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Append a single argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Renders the command line as it would be typed in a shell.
impl fmt::Display for LaunchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.executable.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}
