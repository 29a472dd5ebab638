//! Startup and shutdown ordering for the worker.
//!
//! The inference server is spawned and ready before any job is accepted, and
//! it is stopped exactly once before the worker exits, whichever path leads
//! there: normal exit, SIGTERM/SIGINT, a startup failure, or a failing job
//! server. If the worker unwinds without running the hook, the child handle's
//! `kill_on_drop` still reaps the server.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::SglangClient;
use crate::config::WorkerConfig;
use crate::error::{Result, WorkerError};
use crate::handler::{GenerationResponse, RequestHandler};
use crate::server::{self, AppState};
use crate::signals::shutdown_signal;
use crate::supervisor::{LaunchConfig, ProcessSupervisor};

/// Stops the inference server the first time it runs; later runs are no-ops.
#[derive(Debug, Clone)]
pub struct ShutdownHook {
    supervisor: Arc<ProcessSupervisor>,
    timeout: Duration,
    fired: Arc<AtomicBool>,
}

impl ShutdownHook {
    pub fn new(supervisor: Arc<ProcessSupervisor>, timeout: Duration) -> Self {
        Self {
            supervisor,
            timeout,
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns `true` if this call performed the shutdown.
    pub async fn run(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            debug!("Shutdown hook already ran");
            return false;
        }
        info!("Shutting down inference server");
        self.supervisor.stop(self.timeout).await;
        true
    }

    pub fn has_run(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

/// The worker: one supervised inference server and the handler bound to it.
pub struct Worker {
    config: WorkerConfig,
    supervisor: Arc<ProcessSupervisor>,
    client: Arc<SglangClient>,
    handler: RequestHandler,
    shutdown: ShutdownHook,
}

impl Worker {
    pub fn new(config: WorkerConfig) -> Result<Self> {
        let launch = config.launch_config();
        Self::with_launch(config, launch)
    }

    /// Build a worker that launches `launch` instead of the configured server command.
    pub fn with_launch(config: WorkerConfig, launch: LaunchConfig) -> Result<Self> {
        config.validate()?;

        let supervisor = Arc::new(ProcessSupervisor::new(launch));
        let client = Arc::new(
            SglangClient::new(config.server_url())
                .map_err(|e| WorkerError::config(format!("failed to build HTTP client: {}", e)))?
                .with_probe_timeout(Duration::from_secs(config.probe_timeout_secs)),
        );
        let handler = RequestHandler::new(
            supervisor.clone(),
            client.clone(),
            config.generate_timeout(),
        );
        let shutdown = ShutdownHook::new(supervisor.clone(), config.stop_timeout());

        Ok(Self {
            config,
            supervisor,
            client,
            handler,
            shutdown,
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    pub fn handler(&self) -> &RequestHandler {
        &self.handler
    }

    pub fn shutdown_hook(&self) -> ShutdownHook {
        self.shutdown.clone()
    }

    /// Spawn the inference server and wait for it. Runs the shutdown hook on failure.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<()> {
        info!(
            num_gpus = self.config.num_gpus,
            model = %self.config.model,
            server = %self.config.server_url(),
            "Starting worker"
        );

        let policy = self.config.readiness_policy();
        if let Err(e) = self
            .supervisor
            .start(self.client.as_ref(), &policy, cancel)
            .await
        {
            match &e {
                WorkerError::Cancelled => info!("Startup interrupted by shutdown request"),
                _ => error!(error = %e, "Failed to start inference server"),
            }
            self.shutdown().await;
            return Err(e);
        }
        Ok(())
    }

    /// Accept jobs on `listener` until `cancel` fires.
    pub async fn serve(&self, listener: TcpListener, cancel: CancellationToken) -> Result<()> {
        self.supervisor.mark_serving();
        let state = AppState::new(self.handler.clone(), self.supervisor.clone());
        server::serve(listener, state, cancel).await
    }

    /// Handle a single job input.
    pub async fn handle(&self, input: &Value) -> GenerationResponse {
        self.handler.handle(input).await
    }

    pub async fn shutdown(&self) -> bool {
        self.shutdown.run().await
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if !self.shutdown.has_run() && self.supervisor.pid().is_some() {
            warn!("Worker dropped without shutdown; inference server will be killed");
        }
    }
}

/// Full worker lifecycle: start, serve jobs on `listen`, stop on SIGTERM/SIGINT.
pub async fn run_service(worker: Worker, listen: SocketAddr) -> Result<()> {
    let cancel = CancellationToken::new();
    let signals = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    let result = async {
        worker.start(&cancel).await?;
        let listener = TcpListener::bind(listen).await?;
        info!(addr = %listen, "Accepting jobs");
        worker.serve(listener, cancel.clone()).await
    }
    .await;

    worker.shutdown().await;
    signals.abort();

    match result {
        Err(WorkerError::Cancelled) => Ok(()),
        other => other,
    }
}

/// Start, handle exactly one job input, and stop.
pub async fn run_once(worker: Worker, input: &Value) -> Result<GenerationResponse> {
    let cancel = CancellationToken::new();
    worker.start(&cancel).await?;
    worker.supervisor().mark_serving();
    let response = worker.handle(input).await;
    worker.shutdown().await;
    Ok(response)
}
