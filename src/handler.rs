//! Request handling: validate, check liveness, dispatch, wrap in an envelope.
//!
//! Every stage returns a typed [`WorkerError`]; [`RequestHandler::handle`]
//! folds the outcome into a [`GenerationResponse`] so no failure escapes to
//! the caller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::client::{GenerationParams, InferenceClient};
use crate::error::{ErrorKind, Result, WorkerError};
use crate::supervisor::Liveness;

pub const DEFAULT_MAX_LENGTH: u32 = 1024;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const MAX_TEMPERATURE: f64 = 2.0;

/// Request fields as they arrive, before validation.
#[derive(Debug, Deserialize)]
struct RawRequest {
    prompt: Option<String>,
    max_length: Option<i64>,
    temperature: Option<f64>,
    timeout_secs: Option<f64>,
}

/// A validated generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_length: u32,
    pub temperature: f64,
    pub timeout: Option<Duration>,
}

impl GenerationRequest {
    /// Build a request with default sampling parameters.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_length: DEFAULT_MAX_LENGTH,
            temperature: DEFAULT_TEMPERATURE,
            timeout: None,
        }
    }

    /// Parse and validate a request from the runtime's `input` object.
    pub fn from_input(input: &Value) -> Result<Self> {
        if !input.is_object() {
            return Err(WorkerError::invalid_request("input must be a JSON object"));
        }
        let raw: RawRequest = serde_json::from_value(input.clone())
            .map_err(|e| WorkerError::invalid_request(e.to_string()))?;

        let prompt = raw
            .prompt
            .ok_or_else(|| WorkerError::invalid_request("prompt is required"))?;

        let max_length = match raw.max_length {
            None => DEFAULT_MAX_LENGTH,
            Some(n) => u32::try_from(n)
                .ok()
                .filter(|&n| n > 0)
                .ok_or_else(|| {
                    WorkerError::invalid_request(format!("max_length must be a positive integer, got {}", n))
                })?,
        };

        let timeout = match raw.timeout_secs {
            None => None,
            Some(secs) if secs.is_finite() && secs > 0.0 => Some(Duration::from_secs_f64(secs)),
            Some(secs) => {
                return Err(WorkerError::invalid_request(format!(
                    "timeout_secs must be positive, got {}",
                    secs
                )))
            }
        };

        let request = Self {
            prompt,
            max_length,
            temperature: raw.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            timeout,
        };
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(WorkerError::invalid_request("prompt must not be empty"));
        }
        if self.max_length == 0 {
            return Err(WorkerError::invalid_request("max_length must be greater than 0"));
        }
        if !(0.0..=MAX_TEMPERATURE).contains(&self.temperature) {
            return Err(WorkerError::invalid_request(format!(
                "temperature must be within [0, {}], got {}",
                MAX_TEMPERATURE, self.temperature
            )));
        }
        Ok(())
    }
}

/// The envelope returned to the runtime: `{generated_text}` or `{error}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GenerationResponse {
    Success {
        generated_text: String,
    },
    Failure {
        error: String,
        #[serde(skip)]
        kind: Option<ErrorKind>,
    },
}

impl GenerationResponse {
    pub fn success(text: impl Into<String>) -> Self {
        GenerationResponse::Success {
            generated_text: text.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, GenerationResponse::Success { .. })
    }

    pub fn generated_text(&self) -> Option<&str> {
        match self {
            GenerationResponse::Success { generated_text } => Some(generated_text),
            GenerationResponse::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            GenerationResponse::Success { .. } => None,
            GenerationResponse::Failure { error, .. } => Some(error),
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            GenerationResponse::Success { .. } => None,
            GenerationResponse::Failure { kind, .. } => *kind,
        }
    }
}

impl From<Result<String>> for GenerationResponse {
    fn from(result: Result<String>) -> Self {
        match result {
            Ok(text) => GenerationResponse::success(text),
            Err(e) => GenerationResponse::Failure {
                error: e.to_string(),
                kind: Some(e.kind()),
            },
        }
    }
}

/// Entry point invoked by the runtime, once per job.
///
/// Safe to call concurrently; liveness and client are shared.
#[derive(Clone)]
pub struct RequestHandler {
    liveness: Arc<dyn Liveness>,
    client: Arc<dyn InferenceClient>,
    default_timeout: Duration,
}

impl RequestHandler {
    pub fn new(
        liveness: Arc<dyn Liveness>,
        client: Arc<dyn InferenceClient>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            liveness,
            client,
            default_timeout,
        }
    }

    /// Handle one job input. Never fails; every error becomes an envelope.
    pub async fn handle(&self, input: &Value) -> GenerationResponse {
        let started = Instant::now();
        let result = match GenerationRequest::from_input(input) {
            Ok(request) => self.generate(&request).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(text) => info!(
                chars = text.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Generation completed"
            ),
            Err(e) if e.kind() == ErrorKind::InvalidRequest => {
                warn!(error = %e, "Rejected request")
            }
            Err(e) => error!(
                error = %e,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Request failed"
            ),
        }
        result.into()
    }

    /// Check liveness, then dispatch a validated request.
    pub async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        info!(
            prompt_chars = request.prompt.len(),
            max_length = request.max_length,
            temperature = request.temperature,
            "Received generation request"
        );

        let alive = self.liveness.is_alive();
        debug!(alive = alive, "Checked inference server liveness");
        if !alive {
            return Err(WorkerError::ServerUnavailable);
        }

        let params = GenerationParams {
            prompt: request.prompt.clone(),
            max_new_tokens: request.max_length,
            temperature: request.temperature,
            timeout: request.timeout.unwrap_or(self.default_timeout),
        };
        let text = self.client.generate(&params).await?;
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_applied() {
        let request = GenerationRequest::from_input(&json!({"prompt": "hi"})).unwrap();
        assert_eq!(request.max_length, 1024);
        assert_eq!(request.temperature, 0.7);
        assert_eq!(request.timeout, None);
        assert_eq!(request, GenerationRequest::new("hi"));
    }

    #[test]
    fn test_explicit_fields() {
        let request = GenerationRequest::from_input(
            &json!({"prompt": "hello", "max_length": 10, "temperature": 0, "timeout_secs": 2.5}),
        )
        .unwrap();
        assert_eq!(request.max_length, 10);
        assert_eq!(request.temperature, 0.0);
        assert_eq!(request.timeout, Some(Duration::from_millis(2500)));
    }

    #[test]
    fn test_invalid_inputs() {
        let cases = [
            json!({}),
            json!({"prompt": ""}),
            json!({"prompt": "   \n"}),
            json!({"prompt": 42}),
            json!({"prompt": "x", "max_length": 0}),
            json!({"prompt": "x", "max_length": -5}),
            json!({"prompt": "x", "max_length": 1.5}),
            json!({"prompt": "x", "max_length": "10"}),
            json!({"prompt": "x", "temperature": -0.1}),
            json!({"prompt": "x", "temperature": 2.01}),
            json!({"prompt": "x", "timeout_secs": 0}),
            json!("just a string"),
            Value::Null,
        ];
        for input in cases {
            let err = GenerationRequest::from_input(&input).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidRequest, "input: {}", input);
        }
    }

    #[test]
    fn test_temperature_bounds_inclusive() {
        assert!(GenerationRequest::from_input(&json!({"prompt": "x", "temperature": 2})).is_ok());
        assert!(GenerationRequest::from_input(&json!({"prompt": "x", "temperature": 0.0})).is_ok());
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let request =
            GenerationRequest::from_input(&json!({"prompt": "x", "top_p": 0.9})).unwrap();
        assert_eq!(request.prompt, "x");
    }

    #[test]
    fn test_envelope_serialization() {
        let ok = GenerationResponse::success("done");
        assert_eq!(serde_json::to_value(&ok).unwrap(), json!({"generated_text": "done"}));

        let failed: GenerationResponse = Err(WorkerError::ServerUnavailable).into();
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            json!({"error": "inference server is not running"})
        );
        assert_eq!(failed.error_kind(), Some(ErrorKind::ServerUnavailable));
    }
}
