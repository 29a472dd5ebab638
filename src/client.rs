//! HTTP client for the local SGLang server.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ClientError;
use crate::supervisor::ReadinessProbe;

/// Sampling parameters of one generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub prompt: String,
    pub max_new_tokens: u32,
    pub temperature: f64,
    pub timeout: Duration,
}

/// One generation call per request, no retries.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn generate(&self, params: &GenerationParams) -> Result<String, ClientError>;

    /// Handshake used to detect readiness.
    async fn health(&self) -> Result<(), ClientError>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    text: &'a str,
    sampling_params: SamplingParams,
}

#[derive(Debug, Serialize)]
struct SamplingParams {
    max_new_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    text: Option<serde_json::Value>,
}

/// Client bound to the server's loopback address.
#[derive(Debug, Clone)]
pub struct SglangClient {
    base_url: String,
    http: reqwest::Client,
    probe_timeout: Duration,
}

impl SglangClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            probe_timeout: Duration::from_secs(5),
        })
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_generate(&self, request: &GenerateRequest<'_>) -> Result<String, ClientError> {
        let response = self
            .http
            .post(self.url("/generate"))
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ClientError::MalformedResponse(e.to_string()))?;

        match body.text {
            Some(serde_json::Value::String(text)) => Ok(text),
            Some(other) => Err(ClientError::MalformedResponse(format!(
                "expected string `text`, got {}",
                other
            ))),
            None => Err(ClientError::MalformedResponse(
                "response has no `text` field".to_string(),
            )),
        }
    }
}

async fn status_error(response: reqwest::Response) -> ClientError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    ClientError::Status { status, body }
}

#[async_trait]
impl InferenceClient for SglangClient {
    async fn generate(&self, params: &GenerationParams) -> Result<String, ClientError> {
        let request = GenerateRequest {
            text: &params.prompt,
            sampling_params: SamplingParams {
                max_new_tokens: params.max_new_tokens,
                temperature: params.temperature,
            },
        };

        let call = self.post_generate(&request);

        let text = tokio::time::timeout(params.timeout, call)
            .await
            .map_err(|_| ClientError::Timeout(params.timeout))??;
        debug!(chars = text.len(), "Generation call returned");
        Ok(text)
    }

    async fn health(&self) -> Result<(), ClientError> {
        let response = self
            .http
            .get(self.url("/health"))
            .timeout(self.probe_timeout)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(status_error(response).await)
        }
    }
}

#[async_trait]
impl ReadinessProbe for SglangClient {
    async fn probe(&self) -> Result<(), ClientError> {
        self.health().await
    }
}
