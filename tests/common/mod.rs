//! Common test utilities: a mock SGLang server and child process launches.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, http::StatusCode, routing::get, routing::post, Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use sglang_worker_core::{LaunchConfig, ReadinessPolicy, WorkerConfig};
use tokio::net::TcpListener;

/// What the mock answers on `/generate`.
#[derive(Debug, Clone)]
pub enum MockGenerate {
    Text(String),
    Status(u16),
    Malformed,
}

#[derive(Clone)]
struct MockState {
    ready_after: u32,
    generate: MockGenerate,
    health_calls: Arc<AtomicU32>,
    generate_calls: Arc<AtomicU32>,
    last_body: Arc<Mutex<Option<Value>>>,
}

pub struct MockSglang {
    pub addr: SocketAddr,
    pub health_calls: Arc<AtomicU32>,
    pub generate_calls: Arc<AtomicU32>,
    pub last_body: Arc<Mutex<Option<Value>>>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockSglang {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn health_calls(&self) -> u32 {
        self.health_calls.load(Ordering::SeqCst)
    }

    pub fn generate_calls(&self) -> u32 {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn last_body(&self) -> Option<Value> {
        self.last_body.lock().clone()
    }
}

impl Drop for MockSglang {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn health(State(state): State<MockState>) -> StatusCode {
    let n = state.health_calls.fetch_add(1, Ordering::SeqCst) + 1;
    if n >= state.ready_after {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn generate(State(state): State<MockState>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    state.generate_calls.fetch_add(1, Ordering::SeqCst);
    *state.last_body.lock() = Some(body);
    match state.generate {
        MockGenerate::Text(ref text) => (
            StatusCode::OK,
            Json(json!({"text": text, "meta_info": {"completion_tokens": 3}})),
        ),
        MockGenerate::Status(code) => (
            StatusCode::from_u16(code).unwrap(),
            Json(json!({"error": "mock failure"})),
        ),
        MockGenerate::Malformed => (StatusCode::OK, Json(json!({"output": 42}))),
    }
}

/// Mock server whose `/health` succeeds from the `ready_after`-th call on.
pub async fn start_mock_sglang(ready_after: u32, generate_reply: MockGenerate) -> MockSglang {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let state = MockState {
        ready_after,
        generate: generate_reply,
        health_calls: Arc::new(AtomicU32::new(0)),
        generate_calls: Arc::new(AtomicU32::new(0)),
        last_body: Arc::new(Mutex::new(None)),
    };
    let app = Router::new()
        .route("/health", get(health))
        .route("/generate", post(generate))
        .with_state(state.clone());

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockSglang {
        addr,
        health_calls: state.health_calls,
        generate_calls: state.generate_calls,
        last_body: state.last_body,
        handle,
    }
}

/// A port nothing listens on.
pub fn dead_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Stand-in for the inference server process: lives until signalled.
pub fn sleeper() -> LaunchConfig {
    LaunchConfig::new("mock-sglang", "sleep").args(["30"])
}

/// A child running a shell script.
pub fn shell(script: &str) -> LaunchConfig {
    LaunchConfig::new("mock-sglang", "sh").args(["-c", script])
}

pub fn fast_policy(timeout: Duration) -> ReadinessPolicy {
    ReadinessPolicy {
        timeout,
        poll_interval: Duration::from_millis(50),
        progress_every: 10,
        probe_timeout: Duration::from_millis(500),
    }
}

/// Worker configuration pointing at a mock server with short timings.
pub fn test_config(server_port: u16) -> WorkerConfig {
    let mut config = WorkerConfig::default();
    config.server_port = server_port;
    config.poll_interval_ms = 50;
    config.startup_timeout_secs = 10;
    config.probe_timeout_secs = 1;
    config.stop_timeout_secs = 2;
    config.generate_timeout_secs = 5;
    config.listen = "127.0.0.1:0".to_string();
    config
}
