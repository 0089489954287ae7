//! Response normalizer: projects the loosely-typed model document onto
//! [`NormalizedAnalysis`].
//!
//! Metrics are strict (a non-numeric value is fatal, an out-of-range one is
//! clamped). The three analysis arrays are lenient and fall back to empty.
//! `timestamp` and `engine_version` always come from the server.

use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::invoker::RawModelText;
use super::schema::SchemaError;

pub const METRIC_MIN: f64 = 0.0;
pub const METRIC_MAX: f64 = 10.0;
pub const METRIC_NAMES: [&str; 4] = [
    "risco_emocional",
    "indice_manipulacao",
    "ambivalencia",
    "coerencia_interna",
];

/// Characters of an unparseable payload kept for diagnostics.
const EXCERPT_CHARS: usize = 200;

/// A number literal in value position: after `:`, `[` or `,`.
static NUMBER_LITERAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([:\[,]\s*)(-?[0-9][0-9.eE+-]*)").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Metrics {
    pub risco_emocional: f64,
    pub indice_manipulacao: f64,
    pub ambivalencia: f64,
    pub coerencia_interna: f64,
}

/// Array sections as received; item shapes are the schema gate's business.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct AnalysisSections {
    pub fatos: Vec<Value>,
    pub inferencias: Vec<Value>,
    pub hipoteses: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedAnalysis {
    pub analise: AnalysisSections,
    pub metricas: Metrics,
    pub justificativa: String,
    pub timestamp: String,
    pub engine_version: String,
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    engine_version: String,
}

impl Normalizer {
    pub fn new(engine_version: impl Into<String>) -> Self {
        Self {
            engine_version: engine_version.into(),
        }
    }

    pub fn normalize(&self, raw: &RawModelText) -> Result<NormalizedAnalysis, SchemaError> {
        self.normalize_at(raw, Utc::now())
    }

    pub fn normalize_at(
        &self,
        raw: &RawModelText,
        now: DateTime<Utc>,
    ) -> Result<NormalizedAnalysis, SchemaError> {
        let doc = parse_document(raw.as_str())?;

        let analise = section(&doc, "analise")?;
        let metricas = section(&doc, "metricas")?;

        let metrics = Metrics {
            risco_emocional: metric(metricas, METRIC_NAMES[0])?,
            indice_manipulacao: metric(metricas, METRIC_NAMES[1])?,
            ambivalencia: metric(metricas, METRIC_NAMES[2])?,
            coerencia_interna: metric(metricas, METRIC_NAMES[3])?,
        };

        let sections = AnalysisSections {
            fatos: array_or_empty(analise, "fatos"),
            inferencias: array_or_empty(analise, "inferencias"),
            hipoteses: array_or_empty(analise, "hipoteses"),
        };

        let justificativa = doc
            .get("justificativa")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(NormalizedAnalysis {
            analise: sections,
            metricas: metrics,
            justificativa,
            timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            engine_version: self.engine_version.clone(),
        })
    }
}

fn parse_document(text: &str) -> Result<Value, SchemaError> {
    let err = match serde_json::from_str(text) {
        Ok(doc) => return Ok(doc),
        Err(err) => err,
    };
    // serde_json refuses literals beyond f64 range; quoting them lets the
    // metric check reject the value under its own name.
    if let Some(doc) = quote_overflowing_numbers(text).and_then(|t| serde_json::from_str(&t).ok()) {
        return Ok(doc);
    }
    tracing::warn!(error = %err, chars = text.chars().count(), "model output is not JSON");
    Err(SchemaError::Parse {
        excerpt: excerpt(text),
    })
}

fn quote_overflowing_numbers(text: &str) -> Option<String> {
    let mut replaced = false;
    let out = NUMBER_LITERAL_RE.replace_all(text, |caps: &Captures<'_>| {
        let literal = &caps[2];
        match literal.parse::<f64>() {
            Ok(n) if n.is_infinite() => {
                replaced = true;
                format!("{}\"{}\"", &caps[1], literal)
            }
            _ => caps[0].to_string(),
        }
    });
    replaced.then(|| out.into_owned())
}

fn section<'a>(doc: &'a Value, field: &'static str) -> Result<&'a Map<String, Value>, SchemaError> {
    doc.get(field)
        .and_then(Value::as_object)
        .ok_or(SchemaError::MissingSection { field })
}

fn metric(metricas: &Map<String, Value>, name: &'static str) -> Result<f64, SchemaError> {
    let raw = metricas.get(name);
    coerce_number(raw)
        .map(|v| v.clamp(METRIC_MIN, METRIC_MAX))
        .ok_or_else(|| SchemaError::InvalidMetric {
            metric: name,
            received: raw.cloned().unwrap_or(Value::Null),
        })
}

/// Numbers pass through; numeric strings are parsed; anything else, and any
/// non-finite result, is rejected.
fn coerce_number(value: Option<&Value>) -> Option<f64> {
    let n = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn array_or_empty(analise: &Map<String, Value>, field: &str) -> Vec<Value> {
    match analise.get(field) {
        Some(Value::Array(items)) => items.clone(),
        Some(_) => {
            tracing::debug!(field, "analysis section is not an array; defaulting to empty");
            Vec::new()
        }
        None => Vec::new(),
    }
}

fn excerpt(text: &str) -> String {
    text.chars().take(EXCERPT_CHARS).collect()
}
