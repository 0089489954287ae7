#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use motor_analitico::config::{ApiKey, ModelConfig};
use motor_analitico::AppConfig;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const TEST_KEY: &str = "test-key-3f9a1c";

/// Tracks environment variable mutations and restores originals on drop.
pub struct EnvGuard {
    originals: HashMap<String, Option<String>>,
}

impl EnvGuard {
    pub fn new() -> Self {
        Self {
            originals: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.capture(key);
        std::env::set_var(key, value);
    }

    pub fn set_many(&mut self, entries: &[(&str, &str)]) {
        for (key, value) in entries {
            self.set(key, value);
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.capture(key);
        std::env::remove_var(key);
    }

    fn capture(&mut self, key: &str) {
        if self.originals.contains_key(key) {
            return;
        }
        let original = std::env::var(key).ok();
        self.originals.insert(key.to_string(), original);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, original) in self.originals.drain() {
            match original {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

/// How the fake Gemini endpoint answers.
#[derive(Clone)]
pub enum MockReply {
    /// 200 with the given text as the first candidate part.
    Text(String),
    /// 200 with an empty candidates list.
    NoCandidates,
    /// Non-2xx with a Gemini-style error envelope.
    Error { status: u16, message: String },
    /// Sleep before answering with the inner reply.
    Slow(Duration, Box<MockReply>),
}

#[derive(Default)]
pub struct Captured {
    pub calls: Vec<CapturedCall>,
}

pub struct CapturedCall {
    pub model_action: String,
    pub api_key: Option<String>,
    pub body: Value,
}

#[derive(Clone)]
struct MockState {
    reply: MockReply,
    captured: Arc<Mutex<Captured>>,
}

pub struct MockGemini {
    pub base_url: String,
    pub captured: Arc<Mutex<Captured>>,
    handle: JoinHandle<()>,
}

impl Drop for MockGemini {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub fn candidate_envelope(text: &str) -> Value {
    json!({
        "candidates": [
            { "content": { "role": "model", "parts": [ { "text": text } ] } }
        ]
    })
}

async fn generate(
    State(state): State<MockState>,
    Path(model_action): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> axum::response::Response {
    state.captured.lock().unwrap().calls.push(CapturedCall {
        model_action,
        api_key: headers
            .get("x-goog-api-key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
    });
    let mut reply = state.reply.clone();
    loop {
        match reply {
            MockReply::Slow(delay, inner) => {
                tokio::time::sleep(delay).await;
                reply = *inner;
            }
            MockReply::Text(text) => {
                return (StatusCode::OK, Json(candidate_envelope(&text))).into_response()
            }
            MockReply::NoCandidates => {
                return (StatusCode::OK, Json(json!({ "candidates": [] }))).into_response()
            }
            MockReply::Error { status, message } => {
                let status = StatusCode::from_u16(status).unwrap();
                let body = json!({ "error": { "code": status.as_u16(), "message": message } });
                return (status, Json(body)).into_response();
            }
        }
    }
}

pub async fn spawn_gemini(reply: MockReply) -> MockGemini {
    let captured = Arc::new(Mutex::new(Captured::default()));
    let state = MockState {
        reply,
        captured: captured.clone(),
    };
    let app = Router::new()
        .route("/v1beta/models/:model_action", post(generate))
        .with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    MockGemini {
        base_url: format!("http://{}", addr),
        captured,
        handle,
    }
}

/// Development-mode config aimed at a mock endpoint.
pub fn config_for(base_url: &str) -> AppConfig {
    AppConfig {
        model: ModelConfig {
            api_key: Some(ApiKey::new(TEST_KEY)),
            base_url: base_url.to_string(),
            timeout_ms: 2_000,
            ..ModelConfig::default()
        },
        ..AppConfig::default()
    }
}

/// A model reply that passes every stage.
pub fn valid_model_json() -> Value {
    json!({
        "analise": {
            "fatos": ["A pessoa diz que está cansada."],
            "inferencias": [
                { "afirmacao": "Há sinais de sobrecarga.", "justificativa": "Menciona cansaço recorrente." }
            ],
            "hipoteses": ["Pode haver conflito no trabalho."]
        },
        "metricas": {
            "risco_emocional": 4.5,
            "indice_manipulacao": 1,
            "ambivalencia": 3,
            "coerencia_interna": 8
        },
        "justificativa": "Texto curto e direto."
    })
}
