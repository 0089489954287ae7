//! Core library for the analysis engine. This module wires the analysis
//! pipeline, shared state and the HTTP handlers together.

pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod rate_limit;
pub mod telemetry;

pub use config::AppConfig;
pub use error::{AnalysisError, ErrorBody};
pub use pipeline::schema::ValidatedResponse;
pub use pipeline::Pipeline;

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{
    rejection::{BytesRejection, FailedToBufferBody, JsonRejection},
    DefaultBodyLimit, State,
};
use axum::http::{header, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde_json::{Map, Value};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::metrics::ServiceMetrics;
use crate::pipeline::invoker::ModelTransport;
use crate::rate_limit::RateLimiter;
use crate::telemetry::{RequestEvent, TelemetrySink};

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
    pub config: Arc<AppConfig>,
    pub telemetry: TelemetrySink,
    pub metrics: Arc<ServiceMetrics>,
    pub limiter: Arc<RateLimiter>,
}

/// State backed by the Gemini REST transport.
pub fn build_state(config: AppConfig) -> AppState {
    let pipeline = Pipeline::new(&config);
    assemble(config, pipeline)
}

/// State backed by an arbitrary transport. Tests use this to script the model.
pub fn build_state_with_transport(
    config: AppConfig,
    transport: Arc<dyn ModelTransport>,
) -> AppState {
    let pipeline = Pipeline::with_transport(&config, transport);
    assemble(config, pipeline)
}

/// Build state from environment variables. See [`AppConfig::from_env`].
pub async fn build_state_from_env() -> anyhow::Result<AppState> {
    let config = AppConfig::from_env()?;
    if config.model.api_key.is_none() {
        tracing::warn!("GEMINI_API_KEY not set; /analisar will answer 502 missing_credential");
    }
    Ok(build_state(config))
}

fn assemble(config: AppConfig, pipeline: Pipeline) -> AppState {
    AppState {
        pipeline,
        telemetry: TelemetrySink::from_config(&config.telemetry),
        metrics: Arc::new(ServiceMetrics::new()),
        limiter: Arc::new(RateLimiter::new(&config.rate_limit)),
        config: Arc::new(config),
    }
}

/// Build the Axum router and attach handlers.
pub fn app(state: AppState) -> Router {
    let analisar = post(analisar_handler).route_layer(middleware::from_fn_with_state(
        state.clone(),
        rate_limit::throttle,
    ));

    let router = Router::new()
        .route("/analisar", analisar)
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(not_found_handler)
        .layer(DefaultBodyLimit::max(state.config.max_request_bytes))
        .layer(panic_layer(&state));

    with_security_headers(router).with_state(state)
}

/// Any panic below this layer becomes a classified 500 instead of a dropped
/// connection.
fn panic_layer(
    state: &AppState,
) -> CatchPanicLayer<impl Fn(Box<dyn Any + Send + 'static>) -> Response + Clone> {
    let metrics = state.metrics.clone();
    let production = state.config.production;
    CatchPanicLayer::custom(move |panic: Box<dyn Any + Send + 'static>| {
        let detail = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        let err = AnalysisError::Internal(format!("handler panicked: {}", detail));
        metrics.observe_outcome(err.classify().1);
        err.into_response_with(production)
    })
}

/// Headers attached to every response, errors and fallbacks included.
const SECURITY_HEADERS: [(&str, &str); 6] = [
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("referrer-policy", "no-referrer"),
    ("strict-transport-security", "max-age=15552000; includeSubDomains"),
    (
        "content-security-policy",
        "default-src 'none'; frame-ancestors 'none'",
    ),
    ("cross-origin-resource-policy", "same-origin"),
];

fn with_security_headers(router: Router<AppState>) -> Router<AppState> {
    SECURITY_HEADERS
        .iter()
        .fold(router, |router, &(name, value)| {
            router.layer(SetResponseHeaderLayer::overriding(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            ))
        })
}

/// `POST /analisar`: run the pipeline and record the outcome.
async fn analisar_handler(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let start = Instant::now();
    let (result, timings) = match payload {
        Ok(Json(body)) => state.pipeline.run_with_timings(&body).await,
        // An unparsed body carries no fields, so the sanitizer reports the
        // missing message.
        Err(JsonRejection::MissingJsonContentType(_)) => {
            state
                .pipeline
                .run_with_timings(&Value::Object(Map::new()))
                .await
        }
        Err(rejection) => (Err(rejection_error(&state, rejection)), Vec::new()),
    };
    let latency_ms = start.elapsed().as_millis() as u64;

    let (status, outcome, kind) = match &result {
        Ok(_) => (StatusCode::OK, "ok", None),
        Err(err) => {
            let (status, tag) = err.classify();
            (status, tag, Some(err.kind()))
        }
    };
    state.metrics.observe_analysis(outcome, latency_ms, &timings);
    state.telemetry.emit(&RequestEvent::new(
        status.as_u16(),
        outcome,
        kind,
        latency_ms,
        state.pipeline.engine_version(),
        &timings,
    ));

    match result {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => err.into_response_with(state.config.production),
    }
}

fn rejection_error(state: &AppState, rejection: JsonRejection) -> AnalysisError {
    match rejection {
        JsonRejection::BytesRejection(BytesRejection::FailedToBufferBody(
            FailedToBufferBody::LengthLimitError(_),
        )) => {
            let limit = state.config.max_request_bytes;
            tracing::warn!(limit, "request body exceeded configured limit");
            AnalysisError::PayloadTooLarge { limit }
        }
        other => {
            tracing::debug!(rejection = %other.body_text(), "rejected request body");
            AnalysisError::InvalidJson
        }
    }
}

/// Liveness endpoint.
async fn health_handler(State(state): State<AppState>) -> Response {
    let json = serde_json::json!({
        "status": "ok",
        "engine_version": state.pipeline.engine_version(),
        "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    });
    (StatusCode::OK, Json(json)).into_response()
}

/// Prometheus-style metrics exposition.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let body = state.metrics.render(
        state.pipeline.engine_version(),
        state.telemetry.lines_total(),
        state.telemetry.write_errors_total(),
    );
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}

async fn not_found_handler(State(state): State<AppState>, method: Method, uri: Uri) -> Response {
    let err = AnalysisError::NotFound {
        method: method.to_string(),
        path: uri.path().to_string(),
    };
    state.metrics.observe_outcome(err.classify().1);
    err.into_response_with(state.config.production)
}
