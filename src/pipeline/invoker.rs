//! Model invoker: the pipeline's only suspension point.
//!
//! The invoker owns the timeout and the credential check; the network
//! itself sits behind [`ModelTransport`] so tests can swap in fakes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::prompt::CompiledPrompt;
use crate::config::{ApiKey, ModelConfig};

static LEADING_FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*```[a-z0-9_+-]*[ \t]*\r?\n?").unwrap());
static TRAILING_FENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*```\s*$").unwrap());

/// Generation settings tuned for stable structured output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            top_p: 0.8,
            top_k: 40,
            max_output_tokens: 2048,
        }
    }
}

/// One outbound call as seen by a transport.
pub struct GenerationCall<'a> {
    pub credential: &'a ApiKey,
    pub model: &'a str,
    pub system_instruction: &'a str,
    pub user_instruction: &'a str,
    pub params: GenerationParams,
}

/// Failure reported by a transport. The message must never contain the
/// credential.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
    pub status: Option<u16>,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

/// Remote model boundary. Returns `Ok(None)` when the service answered
/// without any text payload.
#[async_trait::async_trait]
pub trait ModelTransport: Send + Sync {
    fn name(&self) -> &str;
    async fn generate(&self, call: GenerationCall<'_>) -> Result<Option<String>, TransportError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    #[error("GEMINI_API_KEY não configurada. Defina a variável de ambiente.")]
    MissingCredential,
    #[error("Timeout atingido após {timeout_ms}ms na chamada à Gemini API.")]
    Timeout { timeout_ms: u64 },
    #[error("Resposta vazia recebida da Gemini API.")]
    EmptyResponse,
    #[error("Falha na comunicação com a Gemini API.")]
    Api { message: String, status: Option<u16> },
}

impl RemoteError {
    pub fn kind(&self) -> &'static str {
        match self {
            RemoteError::MissingCredential => "missing_credential",
            RemoteError::Timeout { .. } => "timeout",
            RemoteError::EmptyResponse => "empty_response",
            RemoteError::Api { .. } => "api_error",
        }
    }

    pub fn details(&self) -> Value {
        let mut details = serde_json::json!({ "tipo": self.kind() });
        match self {
            RemoteError::Timeout { timeout_ms } => {
                details["timeout_ms"] = Value::from(*timeout_ms);
            }
            RemoteError::Api { message, status } => {
                details["mensagem_original"] = Value::from(message.as_str());
                if let Some(status) = status {
                    details["status"] = Value::from(*status);
                }
            }
            RemoteError::MissingCredential | RemoteError::EmptyResponse => {}
        }
        details
    }
}

/// Untrusted model output with any surrounding code fence removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawModelText(String);

impl RawModelText {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone)]
pub struct ModelInvoker {
    config: Arc<ModelConfig>,
    params: GenerationParams,
    transport: Arc<dyn ModelTransport>,
}

impl ModelInvoker {
    pub fn new(config: ModelConfig, transport: Arc<dyn ModelTransport>) -> Self {
        Self {
            config: Arc::new(config),
            params: GenerationParams::default(),
            transport,
        }
    }

    pub fn timeout_ms(&self) -> u64 {
        self.config.timeout_ms
    }

    pub async fn invoke(&self, prompt: &CompiledPrompt) -> Result<RawModelText, RemoteError> {
        let credential = self
            .config
            .api_key
            .as_ref()
            .ok_or(RemoteError::MissingCredential)?;

        let call = GenerationCall {
            credential,
            model: &self.config.model,
            system_instruction: &prompt.system_instruction,
            user_instruction: &prompt.user_instruction,
            params: self.params,
        };

        let timeout_ms = self.config.timeout_ms;
        let start = Instant::now();
        // Dropping the transport future on expiry aborts the in-flight request.
        let outcome = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.transport.generate(call),
        )
        .await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let text = match outcome {
            Err(_) => {
                tracing::warn!(transport = %self.transport.name(), timeout_ms, "model call timed out");
                return Err(RemoteError::Timeout { timeout_ms });
            }
            Ok(Err(err)) => {
                tracing::warn!(
                    transport = %self.transport.name(),
                    status = ?err.status,
                    error = %err.message,
                    elapsed_ms,
                    "model call failed"
                );
                return Err(RemoteError::Api {
                    message: err.message,
                    status: err.status,
                });
            }
            Ok(Ok(None)) => return Err(RemoteError::EmptyResponse),
            Ok(Ok(Some(text))) => text,
        };

        let stripped = strip_code_fence(&text);
        if stripped.is_empty() {
            return Err(RemoteError::EmptyResponse);
        }
        tracing::debug!(
            transport = %self.transport.name(),
            elapsed_ms,
            chars = stripped.chars().count(),
            "model call completed"
        );
        Ok(RawModelText(stripped))
    }
}

/// Remove a leading ```` ```lang ```` marker and a trailing ```` ``` ````
/// marker, for models that wrap JSON despite being told not to.
pub fn strip_code_fence(text: &str) -> String {
    let without_lead = LEADING_FENCE_RE.replace(text, "");
    let without_trail = TRAILING_FENCE_RE.replace(&without_lead, "");
    without_trail.trim().to_string()
}
