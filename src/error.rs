//! Error taxonomy and its HTTP classification.
//!
//! [`AnalysisError::classify`] is total: every variant maps to exactly one
//! status and wire code. `details` are attached only outside production,
//! and none of them can carry the credential.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;

use crate::pipeline::invoker::RemoteError;
use crate::pipeline::sanitizer::ValidationError;
use crate::pipeline::schema::SchemaError;

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("O corpo da requisição contém JSON inválido.")]
    InvalidJson,
    #[error("Corpo da requisição excede o limite de {limit} bytes.")]
    PayloadTooLarge { limit: usize },
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("Limite de requisições atingido. Tente novamente em alguns minutos.")]
    TooManyRequests { retry_after_secs: u64 },
    #[error("Rota '{method} {path}' não existe.")]
    NotFound { method: String, path: String },
    #[error("{0}")]
    Internal(String),
}

/// Wire shape of every error response.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ErrorBody {
    pub error: &'static str,
    pub code: u16,
    pub message: String,
    pub details: Option<Value>,
}

impl AnalysisError {
    /// HTTP status and wire code tag for this error.
    pub fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            AnalysisError::Validation(_) => (StatusCode::BAD_REQUEST, "ValidationError"),
            AnalysisError::InvalidJson => (StatusCode::BAD_REQUEST, "InvalidJSON"),
            AnalysisError::PayloadTooLarge { .. } => {
                (StatusCode::PAYLOAD_TOO_LARGE, "PayloadTooLarge")
            }
            AnalysisError::Remote(_) => (StatusCode::BAD_GATEWAY, "GeminiError"),
            AnalysisError::Schema(_) => (StatusCode::UNPROCESSABLE_ENTITY, "SchemaError"),
            AnalysisError::TooManyRequests { .. } => {
                (StatusCode::TOO_MANY_REQUESTS, "TooManyRequests")
            }
            AnalysisError::NotFound { .. } => (StatusCode::NOT_FOUND, "NotFound"),
            AnalysisError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "InternalServerError")
            }
        }
    }

    /// Sub-kind used in logs and telemetry, e.g. `timeout` or `empty_string`.
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::Validation(e) => e.kind.as_str(),
            AnalysisError::InvalidJson => "invalid_json",
            AnalysisError::PayloadTooLarge { .. } => "payload_too_large",
            AnalysisError::Remote(e) => e.kind(),
            AnalysisError::Schema(e) => e.kind(),
            AnalysisError::TooManyRequests { .. } => "rate_limited",
            AnalysisError::NotFound { .. } => "not_found",
            AnalysisError::Internal(_) => "internal",
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            AnalysisError::Validation(e) => Some(e.details.clone()),
            AnalysisError::Remote(e) => Some(e.details()),
            AnalysisError::Schema(e) => Some(e.details()),
            AnalysisError::PayloadTooLarge { limit } => {
                Some(serde_json::json!({ "tipo": self.kind(), "limite": limit }))
            }
            AnalysisError::TooManyRequests { retry_after_secs } => Some(
                serde_json::json!({ "tipo": self.kind(), "retry_after_secs": retry_after_secs }),
            ),
            AnalysisError::InvalidJson
            | AnalysisError::NotFound { .. }
            | AnalysisError::Internal(_) => None,
        }
    }

    pub fn to_body(&self, production: bool) -> ErrorBody {
        let (status, tag) = self.classify();
        let message = match self {
            // Unclassified failures never describe themselves to clients.
            AnalysisError::Internal(_) => "Erro interno do servidor. Tente novamente.".to_string(),
            other => other.to_string(),
        };
        ErrorBody {
            error: tag,
            code: status.as_u16(),
            message,
            details: if production { None } else { self.details() },
        }
    }

    /// Build the HTTP response, logging the failure on the way out.
    pub fn into_response_with(self, production: bool) -> Response {
        let (status, tag) = self.classify();
        if status.is_server_error() {
            tracing::error!(code = tag, kind = self.kind(), error = %self, "request failed");
        } else {
            tracing::info!(code = tag, kind = self.kind(), error = %self, "request rejected");
        }
        let body = self.to_body(production);
        let mut response = (status, Json(body)).into_response();
        if let AnalysisError::TooManyRequests { retry_after_secs } = self {
            if let Ok(value) = retry_after_secs.to_string().parse() {
                response.headers_mut().insert("retry-after", value);
            }
        }
        response
    }
}
