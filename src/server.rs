//! Job server: the inbound HTTP surface used by the task runtime.
//!
//! - `POST /run`, `POST /runsync`: `{"id"?, "input": {...}}` in,
//!   `{"id", "output": {"generated_text"} | {"error"}}` out
//! - `GET /health`: supervisor state, 503 while the server cannot take jobs

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::Result;
use crate::handler::{GenerationResponse, RequestHandler};
use crate::supervisor::ProcessSupervisor;

/// A job as delivered by the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub input: Value,
}

/// The job result handed back to the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutput {
    pub id: Option<String>,
    pub output: GenerationResponse,
}

/// Shared server state
#[derive(Clone)]
pub struct AppState {
    handler: RequestHandler,
    supervisor: Arc<ProcessSupervisor>,
}

impl AppState {
    pub fn new(handler: RequestHandler, supervisor: Arc<ProcessSupervisor>) -> Self {
        Self {
            handler,
            supervisor,
        }
    }
}

/// Create the job server router
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/run", post(run_job))
        .route("/runsync", post(run_job))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn run_job(State(state): State<AppState>, Json(job): Json<Job>) -> Json<JobOutput> {
    info!(job_id = ?job.id, "Received job");
    let output = state.handler.handle(&job.input).await;
    Json(JobOutput { id: job.id, output })
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let supervisor = &state.supervisor;
    let alive = supervisor.is_alive();
    let body = Json(serde_json::json!({
        "status": if alive { "ready" } else { "unavailable" },
        "state": supervisor.state().as_str(),
        "pid": supervisor.pid(),
        "version": env!("CARGO_PKG_VERSION"),
    }));
    let status = if alive {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, body)
}

/// Serve jobs on `listener` until `cancel` fires.
pub async fn serve(listener: TcpListener, state: AppState, cancel: CancellationToken) -> Result<()> {
    let app = create_app(state);
    if let Ok(addr) = listener.local_addr() {
        info!("Job server listening on {}", addr);
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    info!("Job server stopped");
    Ok(())
}
