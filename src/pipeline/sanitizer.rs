//! Input sanitizer: turns the raw request payload into a bounded, tag-free
//! string. Content is never rewritten beyond tag removal and whitespace
//! normalisation.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Request field carrying the text to analyse.
pub const MESSAGE_FIELD: &str = "mensagem";

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());
static SPACE_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r" {2,}").unwrap());
static NEWLINE_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    MissingField,
    InvalidType,
    EmptyString,
    MaxLengthExceeded,
}

impl ValidationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationKind::MissingField => "missing_field",
            ValidationKind::InvalidType => "invalid_type",
            ValidationKind::EmptyString => "empty_string",
            ValidationKind::MaxLengthExceeded => "max_length_exceeded",
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    pub kind: ValidationKind,
    pub message: String,
    pub details: Value,
}

impl ValidationError {
    fn new(kind: ValidationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: serde_json::json!({ "campo": MESSAGE_FIELD, "tipo": kind.as_str() }),
        }
    }

    fn with_detail(mut self, key: &str, value: Value) -> Self {
        if let Some(obj) = self.details.as_object_mut() {
            obj.insert(key.to_string(), value);
        }
        self
    }
}

/// Non-empty, tag-stripped, whitespace-normalised text within the configured
/// length limit. Only [`sanitize`] constructs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedText(String);

impl SanitizedText {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length in characters.
    pub fn char_len(&self) -> usize {
        self.0.chars().count()
    }
}

/// Validate the payload and produce [`SanitizedText`].
///
/// The length limit is counted in characters and applied to the sanitized
/// text, so markup that gets stripped does not count against it.
pub fn sanitize(payload: &Value, max_len: usize) -> Result<SanitizedText, ValidationError> {
    let raw = match payload.get(MESSAGE_FIELD) {
        None => {
            return Err(ValidationError::new(
                ValidationKind::MissingField,
                format!("Campo obrigatório ausente: \"{}\".", MESSAGE_FIELD),
            ))
        }
        Some(Value::String(s)) => s,
        Some(other) => {
            return Err(ValidationError::new(
                ValidationKind::InvalidType,
                format!("O campo \"{}\" deve ser uma string.", MESSAGE_FIELD),
            )
            .with_detail("recebido", Value::from(json_type_name(other))))
        }
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(empty_error());
    }

    let cleaned = clean(trimmed);
    // Text made only of markup collapses to nothing.
    if cleaned.is_empty() {
        return Err(empty_error());
    }

    let len = cleaned.chars().count();
    if len > max_len {
        return Err(ValidationError::new(
            ValidationKind::MaxLengthExceeded,
            format!(
                "O campo \"{}\" excede o limite de {} caracteres (recebido: {}).",
                MESSAGE_FIELD, max_len, len
            ),
        )
        .with_detail("limite", Value::from(max_len))
        .with_detail("recebido", Value::from(len)));
    }

    Ok(SanitizedText(cleaned))
}

fn empty_error() -> ValidationError {
    ValidationError::new(
        ValidationKind::EmptyString,
        format!("O campo \"{}\" não pode estar vazio.", MESSAGE_FIELD),
    )
}

/// Tags first, then tabs and space runs, then newline runs, then trim.
fn clean(text: &str) -> String {
    let without_tags = TAG_RE.replace_all(text, "");
    let tabs = without_tags.replace('\t', " ");
    let spaces = SPACE_RUN_RE.replace_all(&tabs, " ");
    let newlines = NEWLINE_RUN_RE.replace_all(&spaces, "\n\n");
    newlines.trim().to_string()
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
