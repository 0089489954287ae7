#[path = "common/mod.rs"]
mod common;

use common::EnvGuard;
use motor_analitico::{build_state_from_env, AppConfig};
use once_cell::sync::Lazy;
use std::sync::Mutex;

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

const VARS: [&str; 9] = [
    "GEMINI_API_KEY",
    "ENGINE_VERSION",
    "GEMINI_TIMEOUT_MS",
    "MAX_MESSAGE_LENGTH",
    "APP_ENV",
    "RATE_LIMIT_MAX",
    "LOG_ROTATE_COMPRESS",
    "LOG_MAX_BYTES",
    "LOG_ROTATE_KEEP",
];

fn clean_env() -> EnvGuard {
    let mut env = EnvGuard::new();
    for var in VARS {
        env.remove(var);
    }
    env
}

#[test]
fn rejects_invalid_boolean_env_values() {
    let _guard = ENV_MUTEX.lock().unwrap();
    let mut env = clean_env();
    env.set("LOG_ROTATE_COMPRESS", "maybe");
    let err = AppConfig::from_env().expect_err("expected invalid boolean to error");
    assert!(format!("{}", err).contains("LOG_ROTATE_COMPRESS"));
}

#[test]
fn rejects_non_numeric_timeout() {
    let _guard = ENV_MUTEX.lock().unwrap();
    let mut env = clean_env();
    env.set("GEMINI_TIMEOUT_MS", "soon");
    let err = AppConfig::from_env().expect_err("expected invalid timeout to error");
    assert!(format!("{}", err).contains("GEMINI_TIMEOUT_MS"));
}

#[test]
fn rejects_zero_message_length() {
    let _guard = ENV_MUTEX.lock().unwrap();
    let mut env = clean_env();
    env.set("MAX_MESSAGE_LENGTH", "0");
    assert!(AppConfig::from_env().is_err());
}

#[test]
fn credential_is_never_printed() {
    let _guard = ENV_MUTEX.lock().unwrap();
    let mut env = clean_env();
    env.set_many(&[("GEMINI_API_KEY", "AIza-very-secret"), ("APP_ENV", "Production")]);
    let cfg = AppConfig::from_env().unwrap();
    assert!(cfg.production);
    assert_eq!(
        cfg.model.api_key.as_ref().map(|k| k.expose()),
        Some("AIza-very-secret")
    );
    assert!(!format!("{:?}", cfg).contains("very-secret"));
}

#[tokio::test]
async fn state_builds_without_credential() {
    let state = {
        let _guard = ENV_MUTEX.lock().unwrap();
        let _env = clean_env();
        build_state_from_env().await.unwrap()
    };
    assert!(state.config.model.api_key.is_none());
    assert_eq!(state.pipeline.engine_version(), "1.0.0");
}
