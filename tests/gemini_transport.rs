#[path = "common/mod.rs"]
mod common;

use common::{spawn_gemini, MockReply, TEST_KEY};
use motor_analitico::config::ApiKey;
use motor_analitico::pipeline::gemini::GeminiTransport;
use motor_analitico::pipeline::invoker::{GenerationCall, GenerationParams, ModelTransport};

fn call(key: &ApiKey) -> GenerationCall<'_> {
    GenerationCall {
        credential: key,
        model: "gemini-1.5-flash",
        system_instruction: "sistema",
        user_instruction: "usuário",
        params: GenerationParams::default(),
    }
}

#[tokio::test]
async fn returns_first_candidate_text() {
    let mock = spawn_gemini(MockReply::Text("{\"ok\":true}".into())).await;
    let transport = GeminiTransport::new(&mock.base_url);
    let key = ApiKey::new(TEST_KEY);
    let text = transport.generate(call(&key)).await.unwrap();
    assert_eq!(text.as_deref(), Some("{\"ok\":true}"));

    let captured = mock.captured.lock().unwrap();
    let body = &captured.calls[0].body;
    assert_eq!(body["systemInstruction"]["parts"][0]["text"], "sistema");
    assert_eq!(body["contents"][0]["role"], "user");
    assert_eq!(body["contents"][0]["parts"][0]["text"], "usuário");
    assert_eq!(body["generationConfig"]["topK"], 40);
    assert_eq!(body["generationConfig"]["maxOutputTokens"], 2048);
}

#[tokio::test]
async fn empty_candidates_yield_none() {
    let mock = spawn_gemini(MockReply::NoCandidates).await;
    let transport = GeminiTransport::new(&mock.base_url);
    let key = ApiKey::new(TEST_KEY);
    assert_eq!(transport.generate(call(&key)).await.unwrap(), None);
}

#[tokio::test]
async fn error_status_carries_upstream_message() {
    let mock = spawn_gemini(MockReply::Error {
        status: 403,
        message: "API key not valid".into(),
    })
    .await;
    let transport = GeminiTransport::new(&mock.base_url);
    let key = ApiKey::new(TEST_KEY);
    let err = transport.generate(call(&key)).await.unwrap_err();
    assert_eq!(err.status, Some(403));
    assert_eq!(err.message, "API key not valid");
}

#[tokio::test]
async fn unreachable_host_is_a_transport_error() {
    // Bind then drop to get a port nothing listens on.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let transport = GeminiTransport::new(&format!("http://{}", addr));
    let key = ApiKey::new(TEST_KEY);
    let err = transport.generate(call(&key)).await.unwrap_err();
    assert_eq!(err.status, None);
    assert!(!err.message.contains(TEST_KEY));
}
