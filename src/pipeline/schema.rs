//! Schema gate: the last check before anything leaves the service.
//!
//! The response schema is a closed Draft-07 document compiled once with
//! `jsonschema`. Undeclared fields are stripped, every remaining violation
//! is collected (not just the first), and only a value that survives is
//! deserialized into [`ValidatedResponse`].

use jsonschema::{Draft, JSONSchema};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::normalizer::{Metrics, NormalizedAnalysis, METRIC_MAX, METRIC_MIN, METRIC_NAMES};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    #[serde(rename = "local")]
    pub location: String,
    #[serde(rename = "mensagem")]
    pub message: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SchemaError {
    #[error("A Gemini retornou uma resposta que não é JSON válido.")]
    Parse { excerpt: String },
    #[error("Campo \"{field}\" ausente ou inválido na resposta Gemini.")]
    MissingSection { field: &'static str },
    #[error("Métrica inválida: \"{metric}\" não é um número válido.")]
    InvalidMetric { metric: &'static str, received: Value },
    #[error("Resposta interna não atende ao schema de validação.")]
    Violations(Vec<Violation>),
}

impl SchemaError {
    pub fn kind(&self) -> &'static str {
        match self {
            SchemaError::Parse { .. } => "json_parse_error",
            SchemaError::MissingSection { .. } => "missing_section",
            SchemaError::InvalidMetric { .. } => "invalid_metric",
            SchemaError::Violations(_) => "schema_validation_failed",
        }
    }

    pub fn details(&self) -> Value {
        match self {
            SchemaError::Parse { excerpt } => {
                serde_json::json!({ "tipo": self.kind(), "trecho": excerpt })
            }
            SchemaError::MissingSection { field } => {
                serde_json::json!({ "tipo": self.kind(), "campo": field })
            }
            SchemaError::InvalidMetric { metric, received } => serde_json::json!({
                "tipo": self.kind(),
                "metrica": metric,
                "valor_recebido": received,
            }),
            SchemaError::Violations(list) => {
                serde_json::json!({ "tipo": self.kind(), "erros": list })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Inference {
    Justified {
        afirmacao: String,
        justificativa: String,
    },
    /// Models sometimes collapse an inference into a bare sentence.
    Plain(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidatedSections {
    pub fatos: Vec<String>,
    pub inferencias: Vec<Inference>,
    pub hipoteses: Vec<String>,
}

/// The only type ever serialized to a client on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidatedResponse {
    pub analise: ValidatedSections,
    pub metricas: Metrics,
    pub justificativa: String,
    pub timestamp: String,
    pub engine_version: String,
}

/// Draft-07 response schema. Every object is closed and every field required.
static RESPONSE_SCHEMA: Lazy<Value> = Lazy::new(|| {
    let text = json!({ "type": "string", "minLength": 1 });
    let metric = json!({ "type": "number", "minimum": METRIC_MIN, "maximum": METRIC_MAX });
    let metric_properties: Map<String, Value> = METRIC_NAMES
        .iter()
        .map(|name| (name.to_string(), metric.clone()))
        .collect();

    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "required": ["analise", "metricas", "justificativa", "timestamp", "engine_version"],
        "additionalProperties": false,
        "properties": {
            "analise": {
                "type": "object",
                "required": ["fatos", "inferencias", "hipoteses"],
                "additionalProperties": false,
                "properties": {
                    "fatos": { "type": "array", "items": text },
                    "inferencias": {
                        "type": "array",
                        "items": {
                            "oneOf": [
                                {
                                    "type": "object",
                                    "required": ["afirmacao", "justificativa"],
                                    "additionalProperties": false,
                                    "properties": {
                                        "afirmacao": text,
                                        "justificativa": text
                                    }
                                },
                                text
                            ]
                        }
                    },
                    "hipoteses": { "type": "array", "items": text }
                }
            },
            "metricas": {
                "type": "object",
                "required": METRIC_NAMES,
                "additionalProperties": false,
                "properties": metric_properties
            },
            "justificativa": { "type": "string" },
            "timestamp": { "type": "string", "format": "date-time" },
            "engine_version": text
        }
    })
});

static COMPILED_SCHEMA: Lazy<JSONSchema> = Lazy::new(|| {
    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&RESPONSE_SCHEMA)
        .expect("response schema must be valid")
});

/// Validate a normalized analysis.
pub fn validate(analysis: &NormalizedAnalysis) -> Result<ValidatedResponse, SchemaError> {
    let value = serde_json::to_value(analysis).map_err(|err| {
        SchemaError::Violations(vec![Violation {
            location: "/".into(),
            message: format!("não serializável: {}", err),
        }])
    })?;
    validate_value(value)
}

/// Validate an arbitrary document. Accepting an already validated response
/// returns it unchanged.
pub fn validate_value(mut value: Value) -> Result<ValidatedResponse, SchemaError> {
    strip_undeclared(&RESPONSE_SCHEMA, &mut value, "");
    let violations: Vec<Violation> = match COMPILED_SCHEMA.validate(&value) {
        Ok(()) => Vec::new(),
        Err(errors) => errors
            .map(|err| Violation {
                location: display_path(&err.instance_path.to_string()).to_string(),
                message: err.to_string(),
            })
            .collect(),
    };
    if !violations.is_empty() {
        tracing::warn!(count = violations.len(), "response rejected by schema gate");
        return Err(SchemaError::Violations(violations));
    }
    serde_json::from_value(value).map_err(|err| {
        SchemaError::Violations(vec![Violation {
            location: "/".into(),
            message: err.to_string(),
        }])
    })
}

/// Drop fields the schema does not declare, wherever an object is closed.
/// `jsonschema` only reports them; stripping happens before validation.
fn strip_undeclared(schema: &Value, value: &mut Value, path: &str) {
    if let Some(branches) = schema.get("oneOf").and_then(Value::as_array) {
        // Branch types are disjoint, so the value's type picks the branch.
        if let Some(branch) = branches.iter().find(|b| type_matches(b, value)) {
            strip_undeclared(branch, value, path);
        }
        return;
    }
    match value {
        Value::Object(map) => {
            let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
                return;
            };
            if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
                let before = map.len();
                map.retain(|key, _| properties.contains_key(key));
                let removed = before - map.len();
                if removed > 0 {
                    tracing::debug!(path = %display_path(path), removed, "stripped undeclared fields");
                }
            }
            for (name, child_schema) in properties {
                if let Some(child) = map.get_mut(name) {
                    strip_undeclared(child_schema, child, &format!("{}/{}", path, name));
                }
            }
        }
        Value::Array(items) => {
            if let Some(item_schema) = schema.get("items") {
                for (idx, item) in items.iter_mut().enumerate() {
                    strip_undeclared(item_schema, item, &format!("{}/{}", path, idx));
                }
            }
        }
        _ => {}
    }
}

fn type_matches(schema: &Value, value: &Value) -> bool {
    match schema.get("type").and_then(Value::as_str) {
        Some("object") => value.is_object(),
        Some("array") => value.is_array(),
        Some("string") => value.is_string(),
        Some("number") => value.is_number(),
        _ => false,
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "/"
    } else {
        path
    }
}
