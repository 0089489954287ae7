use std::env;
use std::fmt;

use anyhow::{anyhow, Result};

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 10_000;
pub const DEFAULT_ENGINE_VERSION: &str = "1.0.0";
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 1024 * 1024;

/// Gemini credential. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

/// Everything the model invoker needs. Built once at startup and injected.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub api_key: Option<ApiKey>,
    pub model: String,
    pub base_url: String,
    pub timeout_ms: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_GEMINI_MODEL.to_string(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u64,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window_secs: 15 * 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RotationConfig {
    pub max_bytes: Option<u64>,
    pub keep: usize,
    pub compress: bool,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            max_bytes: None,
            keep: 1,
            compress: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    pub log_file: Option<String>,
    pub rotation: RotationConfig,
    pub log_stdout: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub model: ModelConfig,
    pub max_message_length: usize,
    pub engine_version: String,
    /// Production mode nulls every error `details` payload.
    pub production: bool,
    pub max_request_bytes: usize,
    pub rate_limit: RateLimitConfig,
    pub telemetry: TelemetryConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
            engine_version: DEFAULT_ENGINE_VERSION.to_string(),
            production: false,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            rate_limit: RateLimitConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let api_key = parse_optional_string("GEMINI_API_KEY").map(ApiKey::new);
        let model = ModelConfig {
            api_key,
            model: parse_optional_string("GEMINI_MODEL")
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            base_url: parse_optional_string("GEMINI_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
            timeout_ms: parse_positive_u64("GEMINI_TIMEOUT_MS")?.unwrap_or(DEFAULT_TIMEOUT_MS),
        };

        let max_message_length = parse_positive_u64("MAX_MESSAGE_LENGTH")?
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_MAX_MESSAGE_LENGTH);
        let engine_version = parse_optional_string("ENGINE_VERSION")
            .unwrap_or_else(|| DEFAULT_ENGINE_VERSION.to_string());
        let production = parse_optional_string("APP_ENV")
            .map(|v| v.eq_ignore_ascii_case("production"))
            .unwrap_or(false);
        let max_request_bytes = parse_positive_u64("MAX_REQUEST_BYTES")?
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_MAX_REQUEST_BYTES);

        let defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            max_requests: parse_positive_u64("RATE_LIMIT_MAX")?.unwrap_or(defaults.max_requests),
            window_secs: parse_positive_u64("RATE_LIMIT_WINDOW_SECS")?
                .unwrap_or(defaults.window_secs),
        };

        let telemetry = TelemetryConfig {
            log_file: parse_optional_string("LOG_FILE"),
            rotation: RotationConfig {
                max_bytes: parse_positive_u64("LOG_MAX_BYTES")?,
                keep: parse_optional_u64("LOG_ROTATE_KEEP")?.unwrap_or(1) as usize,
                compress: parse_bool_env("LOG_ROTATE_COMPRESS")?.unwrap_or(false),
            },
            log_stdout: parse_bool_env("LOG_STDOUT")?.unwrap_or(false),
        };

        Ok(Self {
            model,
            max_message_length,
            engine_version,
            production,
            max_request_bytes,
            rate_limit,
            telemetry,
        })
    }
}

fn parse_optional_string(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a non-negative integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_positive_u64(var: &str) -> Result<Option<u64>> {
    match parse_optional_u64(var)? {
        Some(0) => Err(anyhow!("{} must be a positive integer", var)),
        other => Ok(other),
    }
}

fn parse_bool_env(var: &str) -> Result<Option<bool>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value)
            .map(Some)
            .ok_or_else(|| anyhow!("{} must be a boolean (true/false/1/0)", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::sync::Mutex;

    static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    const VARS: &[&str] = &[
        "GEMINI_API_KEY",
        "GEMINI_MODEL",
        "GEMINI_BASE_URL",
        "GEMINI_TIMEOUT_MS",
        "MAX_MESSAGE_LENGTH",
        "ENGINE_VERSION",
        "APP_ENV",
        "MAX_REQUEST_BYTES",
        "RATE_LIMIT_MAX",
        "RATE_LIMIT_WINDOW_SECS",
        "LOG_FILE",
        "LOG_MAX_BYTES",
        "LOG_ROTATE_KEEP",
        "LOG_ROTATE_COMPRESS",
        "LOG_STDOUT",
    ];

    fn clear() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn parses_environment_defaults() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear();

        let cfg = AppConfig::from_env().unwrap();
        assert!(cfg.model.api_key.is_none());
        assert_eq!(cfg.model.model, "gemini-1.5-flash");
        assert_eq!(cfg.model.timeout_ms, 30_000);
        assert_eq!(cfg.max_message_length, 10_000);
        assert_eq!(cfg.engine_version, "1.0.0");
        assert!(!cfg.production);
        assert_eq!(cfg.rate_limit.max_requests, 60);
        assert_eq!(cfg.rate_limit.window_secs, 900);
        assert!(cfg.telemetry.log_file.is_none());
        assert_eq!(cfg.telemetry.rotation.keep, 1);
    }

    #[test]
    fn parses_full_configuration() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear();

        std::env::set_var("GEMINI_API_KEY", "  sk-live-123  ");
        std::env::set_var("GEMINI_MODEL", "gemini-2.0-flash");
        std::env::set_var("GEMINI_BASE_URL", "http://127.0.0.1:9999/");
        std::env::set_var("GEMINI_TIMEOUT_MS", "1500");
        std::env::set_var("MAX_MESSAGE_LENGTH", "500");
        std::env::set_var("ENGINE_VERSION", "2.1.0");
        std::env::set_var("APP_ENV", "Production");
        std::env::set_var("MAX_REQUEST_BYTES", "4096");
        std::env::set_var("RATE_LIMIT_MAX", "5");
        std::env::set_var("RATE_LIMIT_WINDOW_SECS", "60");
        std::env::set_var("LOG_FILE", "/tmp/motor.log");
        std::env::set_var("LOG_MAX_BYTES", "2048");
        std::env::set_var("LOG_ROTATE_KEEP", "3");
        std::env::set_var("LOG_ROTATE_COMPRESS", "yes");
        std::env::set_var("LOG_STDOUT", "1");

        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(
            cfg.model.api_key.as_ref().map(ApiKey::expose),
            Some("sk-live-123")
        );
        assert_eq!(cfg.model.model, "gemini-2.0-flash");
        assert_eq!(cfg.model.base_url, "http://127.0.0.1:9999");
        assert_eq!(cfg.model.timeout_ms, 1500);
        assert_eq!(cfg.max_message_length, 500);
        assert_eq!(cfg.engine_version, "2.1.0");
        assert!(cfg.production);
        assert_eq!(cfg.max_request_bytes, 4096);
        assert_eq!(cfg.rate_limit.max_requests, 5);
        assert_eq!(cfg.rate_limit.window_secs, 60);
        assert_eq!(cfg.telemetry.log_file.as_deref(), Some("/tmp/motor.log"));
        assert_eq!(cfg.telemetry.rotation.max_bytes, Some(2048));
        assert_eq!(cfg.telemetry.rotation.keep, 3);
        assert!(cfg.telemetry.rotation.compress);
        assert!(cfg.telemetry.log_stdout);

        clear();
    }

    #[test]
    fn rejects_zero_timeout() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear();
        std::env::set_var("GEMINI_TIMEOUT_MS", "0");
        let err = AppConfig::from_env().expect_err("zero timeout must be rejected");
        assert!(err.to_string().contains("GEMINI_TIMEOUT_MS"));
        clear();
    }

    #[test]
    fn debug_output_redacts_credential() {
        let cfg = ModelConfig {
            api_key: Some(ApiKey::new("super-secret-key")),
            ..ModelConfig::default()
        };
        let dump = format!("{:?}", cfg);
        assert!(!dump.contains("super-secret-key"));
        assert!(dump.contains("redacted"));
    }
}
