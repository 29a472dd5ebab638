//! Serverless worker around a local SGLang inference server.
//!
//! The worker launches the inference server as a child process, waits until it
//! answers its health handshake, then dispatches generation jobs to it over
//! loopback HTTP. The child is stopped exactly once when the worker exits.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod lifecycle;
pub mod log_relay;
pub mod server;
pub mod signals;
pub mod supervisor;

// Re-export commonly used types
pub use client::{GenerationParams, InferenceClient, SglangClient};
pub use config::WorkerConfig;
pub use error::{ClientError, ErrorKind, Result, WorkerError};
pub use handler::{GenerationRequest, GenerationResponse, RequestHandler};
pub use lifecycle::{ShutdownHook, Worker};
pub use supervisor::{
    LaunchConfig, Liveness, ProcessSupervisor, ReadinessPolicy, ReadinessProbe, ServerState,
};
