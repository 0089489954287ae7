//! Gemini `generateContent` over REST.
//!
//! The credential travels only in the `x-goog-api-key` header, never in the
//! URL, so transport error messages (which may quote the URL) stay clean.

use serde::{Deserialize, Serialize};

use super::invoker::{GenerationCall, ModelTransport, TransportError};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

pub struct GeminiTransport {
    base_url: String,
    client: reqwest::Client,
}

impl GeminiTransport {
    /// The invoker enforces the wall-clock timeout; the client itself has none.
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, model)
    }
}

#[async_trait::async_trait]
impl ModelTransport for GeminiTransport {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, call: GenerationCall<'_>) -> Result<Option<String>, TransportError> {
        let body = GenerateContentRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: call.system_instruction,
                }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part {
                    text: call.user_instruction,
                }],
            }],
            generation_config: GenerationConfig {
                temperature: call.params.temperature,
                top_p: call.params.top_p,
                top_k: call.params.top_k,
                max_output_tokens: call.params.max_output_tokens,
            },
        };

        let resp = self
            .client
            .post(self.endpoint(call.model))
            .header("x-goog-api-key", call.credential.expose())
            .json(&body)
            .send()
            .await
            .map_err(|err| TransportError::new(describe(&err)))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|err| TransportError::new(describe(&err)).with_status(status.as_u16()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&text)
                .ok()
                .and_then(|env| env.error.message)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(TransportError::new(message).with_status(status.as_u16()));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&text).map_err(|err| {
            TransportError::new(format!("unreadable generateContent response: {}", err))
                .with_status(status.as_u16())
        })?;

        let joined: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if joined.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(joined))
        }
    }
}

fn describe(err: &reqwest::Error) -> String {
    // reqwest's Display includes the URL, which carries no secret here.
    if err.is_connect() {
        format!("connection failed: {}", err)
    } else if err.is_timeout() {
        format!("transport timeout: {}", err)
    } else {
        err.to_string()
    }
}
