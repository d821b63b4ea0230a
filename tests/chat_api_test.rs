//! Mock API tests for the transport client.
//!
//! These tests use wiremock to simulate OpenAI-compatible API responses.
//! Response formats follow the official chat-completions reference:
//! https://platform.openai.com/docs/api-reference/chat/create

use std::time::Duration;

use chatbench::prelude::*;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn chat_completion_response() -> serde_json::Value {
    json!({
        "id": "chatcmpl-123",
        "object": "chat.completion",
        "created": 1677652288,
        "model": "gpt-4o-mini",
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": "Hello! How can I help you today?"
            },
            "finish_reason": "stop"
        }],
        "usage": {
            "prompt_tokens": 9,
            "completion_tokens": 12,
            "total_tokens": 21
        }
    })
}

fn error_response(error_type: &str, message: &str, code: &str) -> serde_json::Value {
    json!({
        "error": {
            "message": message,
            "type": error_type,
            "param": null,
            "code": code
        }
    })
}

fn models_response() -> serde_json::Value {
    json!({
        "object": "list",
        "data": [
            {"id": "gpt-4o-mini", "object": "model", "owned_by": "openai"},
            {"id": "text-embedding-3-small", "object": "model", "owned_by": "openai"},
            {
                "id": "router/cheap-chat",
                "object": "model",
                "owned_by": "router",
                "context_length": 32768,
                "pricing": {"prompt": "0.0005", "completion": "0.0015"}
            }
        ]
    })
}

fn client_for(server: &MockServer) -> ApiClient {
    let profile = EndpointProfile::new("test", "test-api-key", server.uri()).with_model("gpt-4o-mini");
    ApiClient::new(profile).unwrap()
}

#[tokio::test]
async fn chat_completion_non_streaming() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer test-api-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion_response()))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let request = ChatRequest::new(vec![ChatMessage::user("Hello")]);
    let response = client.chat(&request, &CancellationToken::new()).await.unwrap();

    assert_eq!(response.content, "Hello! How can I help you today?");
    assert_eq!(response.model.as_deref(), Some("gpt-4o-mini"));
    assert_eq!(response.finish_reason, Some(FinishReason::Stop));

    let usage = response.usage.unwrap();
    assert_eq!(usage.prompt_tokens, 9);
    assert_eq!(usage.completion_tokens, 12);
    assert_eq!(usage.total_tokens, 21);
}

#[tokio::test]
async fn http_401_normalizes_to_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(error_response(
            "invalid_request_error",
            "Incorrect API key provided",
            "invalid_api_key",
        )))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let request = ChatRequest::new(vec![ChatMessage::user("Hello")]);
    let err = client
        .chat(&request, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Auth);
    assert_eq!(err.status_code(), Some(401));
    assert!(err.to_string().contains("Incorrect API key"));
}

#[tokio::test]
async fn http_400_normalizes_to_validation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(error_response(
            "invalid_request_error",
            "you must provide a model parameter",
            "missing_model",
        )))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let request = ChatRequest::new(vec![ChatMessage::user("Hello")]);
    let err = client
        .chat(&request, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Validation);
}

#[tokio::test]
async fn http_500_normalizes_to_server() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let request = ChatRequest::new(vec![ChatMessage::user("Hello")]);
    let err = client
        .chat(&request, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Server);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn unreachable_endpoint_normalizes_to_network() {
    // Nothing listens on the discard port.
    let profile = EndpointProfile::new("test", "test-api-key", "http://127.0.0.1:9")
        .with_model("gpt-4o-mini")
        .with_timeout(Duration::from_secs(2));
    let client = ApiClient::new(profile).unwrap();
    let request = ChatRequest::new(vec![ChatMessage::user("Hello")]);
    let err = client
        .chat(&request, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Network);
    assert_eq!(err.status_code(), None);
}

#[tokio::test]
async fn test_connection_reports_success_with_elapsed_time() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(models_response()))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let report = client.test_connection().await;
    assert!(report.success);
    assert!(report.elapsed > Duration::ZERO);
    assert!(report.error.is_none());
}

#[tokio::test]
async fn test_connection_classifies_auth_failures_without_throwing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(401).set_body_json(error_response(
            "invalid_request_error",
            "Incorrect API key provided",
            "invalid_api_key",
        )))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let report = client.test_connection().await;
    assert!(!report.success);
    assert!(report.elapsed > Duration::ZERO);
    let message = report.error.unwrap();
    assert!(message.starts_with("auth"), "got: {message}");
}

#[tokio::test]
async fn model_listing_is_cached_within_the_ttl() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(models_response()))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let first = client.list_models(false).await.unwrap();
    let second = client.list_models(false).await.unwrap();
    assert_eq!(first.len(), second.len());
    // The mock's expect(1) verifies exactly one live fetch on drop.
}

#[tokio::test]
async fn model_listing_refetches_after_the_ttl_elapses() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(models_response()))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server).with_model_ttl(Duration::from_millis(40));
    client.list_models(false).await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    client.list_models(false).await.unwrap();
}

#[tokio::test]
async fn force_refresh_bypasses_a_fresh_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(models_response()))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client.list_models(false).await.unwrap();
    client.list_models(true).await.unwrap();
}

#[tokio::test]
async fn model_listing_canonicalizes_provider_shapes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(models_response()))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let models = client.list_models(false).await.unwrap();
    assert_eq!(models.len(), 3);

    let chat = models.iter().find(|m| m.id == "gpt-4o-mini").unwrap();
    assert_eq!(chat.kind, ModelKind::Multimodal);
    assert!(chat.capabilities.contains(&"chat".to_string()));

    let embedding = models
        .iter()
        .find(|m| m.id == "text-embedding-3-small")
        .unwrap();
    assert_eq!(embedding.kind, ModelKind::Embedding);

    let priced = models.iter().find(|m| m.id == "router/cheap-chat").unwrap();
    assert_eq!(priced.context_window, Some(32_768));
    let price = priced.price.unwrap();
    assert_eq!(price.input, 0.0005);
    assert_eq!(price.output, 0.0015);
}
