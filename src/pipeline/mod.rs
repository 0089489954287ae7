//! The analysis pipeline.
//!
//! Five stages run strictly in order: sanitize, compile, invoke, normalize,
//! validate. The first failing stage short-circuits the rest; its error
//! kind is carried upward unchanged. Only `invoke` suspends.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use crate::config::AppConfig;
use crate::error::AnalysisError;

pub mod gemini;
pub mod invoker;
pub mod normalizer;
pub mod prompt;
pub mod sanitizer;
pub mod schema;

use self::gemini::GeminiTransport;
use self::invoker::{ModelInvoker, ModelTransport};
use self::normalizer::Normalizer;
use self::schema::ValidatedResponse;

pub const STAGES: [&str; 5] = ["sanitize", "compile", "invoke", "normalize", "validate"];

/// Elapsed milliseconds per completed (or failing) stage, in run order.
pub type StageTimings = Vec<(&'static str, u64)>;

/// Stateless apart from read-only configuration; clone freely across requests.
#[derive(Clone)]
pub struct Pipeline {
    max_message_length: usize,
    engine_version: Arc<str>,
    invoker: ModelInvoker,
    normalizer: Normalizer,
}

impl Pipeline {
    /// Pipeline talking to the Gemini REST API at the configured base URL.
    pub fn new(config: &AppConfig) -> Self {
        let transport = Arc::new(GeminiTransport::new(&config.model.base_url));
        Self::with_transport(config, transport)
    }

    pub fn with_transport(config: &AppConfig, transport: Arc<dyn ModelTransport>) -> Self {
        Self {
            max_message_length: config.max_message_length,
            engine_version: Arc::from(config.engine_version.as_str()),
            invoker: ModelInvoker::new(config.model.clone(), transport),
            normalizer: Normalizer::new(config.engine_version.clone()),
        }
    }

    pub fn engine_version(&self) -> &str {
        &self.engine_version
    }

    pub async fn run(&self, payload: &Value) -> Result<ValidatedResponse, AnalysisError> {
        self.run_with_timings(payload).await.0
    }

    /// Run every stage and report how long each one took.
    pub async fn run_with_timings(
        &self,
        payload: &Value,
    ) -> (Result<ValidatedResponse, AnalysisError>, StageTimings) {
        let mut timings: StageTimings = Vec::with_capacity(STAGES.len());
        let result = self.run_stages(payload, &mut timings).await;
        (result, timings)
    }

    async fn run_stages(
        &self,
        payload: &Value,
        timings: &mut StageTimings,
    ) -> Result<ValidatedResponse, AnalysisError> {
        let start = Instant::now();
        let text = sanitizer::sanitize(payload, self.max_message_length);
        record(timings, "sanitize", start);
        let text = text?;
        tracing::trace!(chars = text.char_len(), "input sanitized");

        let start = Instant::now();
        let compiled = prompt::compile(&text, &self.engine_version);
        record(timings, "compile", start);

        let start = Instant::now();
        let raw = self.invoker.invoke(&compiled).await;
        record(timings, "invoke", start);
        let raw = raw?;

        let start = Instant::now();
        let normalized = self.normalizer.normalize(&raw);
        record(timings, "normalize", start);
        let normalized = normalized?;

        let start = Instant::now();
        let validated = schema::validate(&normalized);
        record(timings, "validate", start);
        validated.map_err(AnalysisError::from)
    }
}

fn record(timings: &mut StageTimings, stage: &'static str, start: Instant) {
    timings.push((stage, start.elapsed().as_millis() as u64));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiKey, ModelConfig};
    use crate::pipeline::invoker::{GenerationCall, TransportError};
    use serde_json::json;
    use std::sync::Mutex;

    struct Echo {
        reply: String,
        seen_user: Mutex<Option<String>>,
    }

    #[async_trait::async_trait]
    impl ModelTransport for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn generate(&self, call: GenerationCall<'_>) -> Result<Option<String>, TransportError> {
            *self.seen_user.lock().unwrap() = Some(call.user_instruction.to_string());
            Ok(Some(self.reply.clone()))
        }
    }

    fn config() -> AppConfig {
        AppConfig {
            model: ModelConfig {
                api_key: Some(ApiKey::new("test-key")),
                ..ModelConfig::default()
            },
            engine_version: "2.0.0".into(),
            ..AppConfig::default()
        }
    }

    fn reply() -> String {
        json!({
            "analise": { "fatos": ["a"], "inferencias": [], "hipoteses": [] },
            "metricas": {
                "risco_emocional": 15,
                "indice_manipulacao": 1,
                "ambivalencia": 2,
                "coerencia_interna": 3
            },
            "justificativa": "j",
            "engine_version": "0.0.1"
        })
        .to_string()
    }

    #[tokio::test]
    async fn runs_all_stages_in_order() {
        let echo = Arc::new(Echo {
            reply: reply(),
            seen_user: Mutex::new(None),
        });
        let pipeline = Pipeline::with_transport(&config(), echo.clone());
        let (result, timings) = pipeline
            .run_with_timings(&json!({ "mensagem": "<b>Oi</b>   tudo bem?" }))
            .await;
        let out = result.unwrap();
        assert_eq!(out.metricas.risco_emocional, 10.0);
        assert_eq!(out.engine_version, "2.0.0");
        let stages: Vec<_> = timings.iter().map(|(s, _)| *s).collect();
        assert_eq!(stages, STAGES.to_vec());
        let seen = echo.seen_user.lock().unwrap().clone().unwrap();
        assert!(seen.contains("Oi tudo bem?"));
    }

    #[tokio::test]
    async fn failing_stage_short_circuits() {
        let echo = Arc::new(Echo {
            reply: reply(),
            seen_user: Mutex::new(None),
        });
        let pipeline = Pipeline::with_transport(&config(), echo.clone());
        let (result, timings) = pipeline.run_with_timings(&json!({ "mensagem": "" })).await;
        assert!(matches!(result, Err(AnalysisError::Validation(_))));
        assert_eq!(timings.len(), 1);
        assert!(echo.seen_user.lock().unwrap().is_none());
    }
}
