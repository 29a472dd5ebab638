//! Error types for the worker.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// A specialized Result type for worker operations.
pub type Result<T> = std::result::Result<T, WorkerError>;

/// Errors raised by the HTTP client talking to the inference server.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection refused, reset, DNS, TLS, or body read failures.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("inference server returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The server answered 2xx but the body was not what we expect.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The call did not complete within its deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

/// The error type for worker operations.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Malformed or out-of-range request input.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The inference server did not answer its handshake in time.
    #[error("inference server did not become ready within {0:?}")]
    StartupTimeout(Duration),

    /// The inference server exited before becoming ready.
    #[error("inference server exited during startup ({})", ExitCode(.code))]
    ServerCrashedDuringStartup { code: Option<i32> },

    /// The inference server is not running (or not yet ready).
    #[error("inference server is not running")]
    ServerUnavailable,

    /// Transport or protocol failure while generating.
    #[error("generation failed: {0}")]
    GenerationFailure(#[from] ClientError),

    /// The inference server process could not be launched.
    #[error("failed to spawn inference server: {0}")]
    Spawn(String),

    /// `start` was called on a supervisor that already owns a process.
    #[error("inference server already started")]
    AlreadyStarted,

    /// Startup was interrupted by a shutdown request.
    #[error("startup cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable category of a [`WorkerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    StartupTimeout,
    ServerCrashedDuringStartup,
    ServerUnavailable,
    GenerationFailure,
    Spawn,
    AlreadyStarted,
    Cancelled,
    Config,
    Io,
}

impl WorkerError {
    /// Create an invalid request error
    pub fn invalid_request<S: Into<String>>(msg: S) -> Self {
        WorkerError::InvalidRequest(msg.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        WorkerError::Config(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkerError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            WorkerError::StartupTimeout(_) => ErrorKind::StartupTimeout,
            WorkerError::ServerCrashedDuringStartup { .. } => {
                ErrorKind::ServerCrashedDuringStartup
            }
            WorkerError::ServerUnavailable => ErrorKind::ServerUnavailable,
            WorkerError::GenerationFailure(_) => ErrorKind::GenerationFailure,
            WorkerError::Spawn(_) => ErrorKind::Spawn,
            WorkerError::AlreadyStarted => ErrorKind::AlreadyStarted,
            WorkerError::Cancelled => ErrorKind::Cancelled,
            WorkerError::Config(_) => ErrorKind::Config,
            WorkerError::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether this error must abort worker initialization.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::StartupTimeout
                | ErrorKind::ServerCrashedDuringStartup
                | ErrorKind::Spawn
                | ErrorKind::Config
        )
    }
}

impl From<config::ConfigError> for WorkerError {
    fn from(err: config::ConfigError) -> Self {
        WorkerError::Config(err.to_string())
    }
}

/// Display helper for an optional process exit code.
pub(crate) struct ExitCode<'a>(pub &'a Option<i32>);

impl fmt::Display for ExitCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(code) => write!(f, "exit code {}", code),
            None => write!(f, "terminated by signal"),
        }
    }
}
