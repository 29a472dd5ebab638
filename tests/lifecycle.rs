mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{dead_port, shell, sleeper, start_mock_sglang, test_config, MockGenerate};
use serde_json::json;
use sglang_worker_core::lifecycle::run_once;
use sglang_worker_core::{
    ErrorKind, RequestHandler, ServerState, SglangClient, Worker,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_end_to_end_generation() {
    let mock = start_mock_sglang(3, MockGenerate::Text("<mocked output>".into())).await;
    let worker = Worker::with_launch(test_config(mock.port()), sleeper()).unwrap();
    assert_eq!(worker.supervisor().state(), ServerState::NotStarted);

    worker.start(&CancellationToken::new()).await.unwrap();
    assert_eq!(
        worker.supervisor().transitions(),
        vec![ServerState::NotStarted, ServerState::Starting, ServerState::Ready]
    );
    assert_eq!(mock.health_calls(), 3);

    let response = worker
        .handle(&json!({"prompt": "hello", "max_length": 10, "temperature": 0.5}))
        .await;
    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        json!({"generated_text": "<mocked output>"})
    );
    assert_eq!(
        mock.last_body().unwrap(),
        json!({"text": "hello", "sampling_params": {"max_new_tokens": 10, "temperature": 0.5}})
    );

    assert!(worker.shutdown().await);
    assert!(!worker.shutdown().await);
    assert_eq!(worker.supervisor().state(), ServerState::Stopped);

    let response = worker.handle(&json!({"prompt": "hello"})).await;
    assert_eq!(response.error_kind(), Some(ErrorKind::ServerUnavailable));
    assert_eq!(mock.generate_calls(), 1);
}

#[tokio::test]
async fn test_server_error_does_not_crash_supervisor() {
    let mock = start_mock_sglang(1, MockGenerate::Status(500)).await;
    let worker = Worker::with_launch(test_config(mock.port()), sleeper()).unwrap();
    worker.start(&CancellationToken::new()).await.unwrap();
    worker.supervisor().mark_serving();

    let response = worker.handle(&json!({"prompt": "x"})).await;
    assert_eq!(response.error_kind(), Some(ErrorKind::GenerationFailure));
    assert!(response.error().unwrap().contains("500"));
    assert_eq!(worker.supervisor().state(), ServerState::Serving);
    assert!(worker.supervisor().is_alive());

    worker.shutdown().await;
}

#[tokio::test]
async fn test_malformed_response_is_generation_failure() {
    let mock = start_mock_sglang(1, MockGenerate::Malformed).await;
    let worker = Worker::with_launch(test_config(mock.port()), sleeper()).unwrap();
    worker.start(&CancellationToken::new()).await.unwrap();

    let response = worker.handle(&json!({"prompt": "x"})).await;
    assert_eq!(response.error_kind(), Some(ErrorKind::GenerationFailure));
    assert!(response.error().unwrap().contains("malformed response"));
    assert_eq!(worker.supervisor().state(), ServerState::Ready);

    worker.shutdown().await;
}

#[tokio::test]
async fn test_transport_error_keeps_worker_ready() {
    let mock = start_mock_sglang(1, MockGenerate::Text("unused".into())).await;
    let worker = Worker::with_launch(test_config(mock.port()), sleeper()).unwrap();
    worker.start(&CancellationToken::new()).await.unwrap();

    // Same supervisor, but a client bound to an address nothing listens on.
    let broken = Arc::new(SglangClient::new(format!("http://127.0.0.1:{}", dead_port())).unwrap());
    let handler = RequestHandler::new(worker.supervisor().clone(), broken, Duration::from_secs(5));

    let response = handler.handle(&json!({"prompt": "x"})).await;
    assert_eq!(response.error_kind(), Some(ErrorKind::GenerationFailure));
    assert!(response.error().unwrap().contains("transport error"));
    assert_eq!(worker.supervisor().state(), ServerState::Ready);
    assert!(worker.supervisor().is_alive());

    worker.shutdown().await;
}

#[tokio::test]
async fn test_startup_failure_runs_shutdown_hook() {
    let worker = Worker::with_launch(test_config(dead_port()), shell("exit 2")).unwrap();
    let hook = worker.shutdown_hook();

    let err = worker.start(&CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServerCrashedDuringStartup);
    assert!(err.is_fatal());
    assert!(hook.has_run());
    assert!(!hook.run().await);
}

#[tokio::test]
async fn test_run_once_handles_single_job() {
    let mock = start_mock_sglang(2, MockGenerate::Text("single".into())).await;
    let worker = Worker::with_launch(test_config(mock.port()), sleeper()).unwrap();

    let response = run_once(worker, &json!({"prompt": "one job"})).await.unwrap();
    assert_eq!(response.generated_text(), Some("single"));
}

#[tokio::test]
async fn test_serve_accepts_jobs_until_cancelled() {
    let mock = start_mock_sglang(1, MockGenerate::Text("served".into())).await;
    let worker = Arc::new(Worker::with_launch(test_config(mock.port()), sleeper()).unwrap());
    worker.start(&CancellationToken::new()).await.unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let server = tokio::spawn({
        let worker = worker.clone();
        let cancel = cancel.clone();
        async move { worker.serve(listener, cancel).await }
    });

    let http = reqwest::Client::new();
    let health = http.get(format!("http://{}/health", addr)).send().await.unwrap();
    assert_eq!(health.status(), 200);
    let health: serde_json::Value = health.json().await.unwrap();
    assert_eq!(health["state"], "serving");

    let output: serde_json::Value = http
        .post(format!("http://{}/runsync", addr))
        .json(&json!({"id": "job-1", "input": {"prompt": "hi"}}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(output, json!({"id": "job-1", "output": {"generated_text": "served"}}));

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    worker.shutdown().await;
    assert_eq!(worker.supervisor().state(), ServerState::Stopped);
}
