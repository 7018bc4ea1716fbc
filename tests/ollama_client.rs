//! HTTP-level tests for the Ollama client using wiremock.

use std::sync::{Arc, Mutex};

use ollama_chat::models::StreamStats;
use ollama_chat::providers::ollama::StatsCallback;
use ollama_chat::providers::{ChatError, ChatMessage, ChatProvider, OllamaClient};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn ndjson_body() -> String {
    [
        r#"{"model":"llama3.2","message":{"role":"assistant","content":"Hel"},"done":false}"#,
        r#"{"model":"llama3.2","message":{"role":"assistant","content":"lo"},"done":false}"#,
        r#"{"model":"llama3.2","message":{"role":"assistant","content":"!"},"done":false}"#,
        r#"{"model":"llama3.2","message":{"role":"assistant","content":""},"done":true,"eval_count":3}"#,
    ]
    .join("\n")
        + "\n"
}

fn history() -> Vec<ChatMessage> {
    vec![
        ChatMessage::system("You are a helpful AI assistant."),
        ChatMessage::user("Say hello"),
    ]
}

#[tokio::test]
async fn stream_yields_fragments_and_reports_stats_once() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(
            serde_json::json!({ "model": "llama3.2", "stream": true }),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_string(ndjson_body()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let reported: Arc<Mutex<Vec<StreamStats>>> = Arc::default();
    let sink = reported.clone();
    let on_stats: StatsCallback = Box::new(move |stats: StreamStats| {
        sink.lock().unwrap().push(stats);
    });
    let client = OllamaClient::new(&mock_server.uri()).unwrap();
    let mut stream = client
        .stream_chat("llama3.2", history(), Some(on_stats))
        .await
        .expect("should open");

    let mut fragments = Vec::new();
    while let Some(fragment) = stream.next().await {
        fragments.push(fragment.expect("fragment"));
    }

    assert_eq!(fragments, vec!["Hel", "lo", "!"]);
    let reported = reported.lock().unwrap();
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].tokens_generated, 3);
    assert_eq!(stream.stats(), Some(reported[0]));
}

#[tokio::test]
async fn request_carries_the_full_history() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ndjson_body()))
        .mount(&mock_server)
        .await;

    let client = OllamaClient::new(&mock_server.uri()).unwrap();
    client
        .send_message("llama3.2", history())
        .await
        .expect("should succeed");

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(
        body["messages"],
        serde_json::json!([
            { "role": "system", "content": "You are a helpful AI assistant." },
            { "role": "user", "content": "Say hello" },
        ])
    );
    assert_eq!(body["stream"], true);
}

#[tokio::test]
async fn send_message_concatenates_fragments() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ndjson_body()))
        .mount(&mock_server)
        .await;

    let client = OllamaClient::new(&mock_server.uri()).unwrap();
    let response = client.send_message("llama3.2", history()).await.unwrap();

    assert_eq!(response.content, "Hello!");
    assert_eq!(response.stats.tokens_generated, 3);
}

#[tokio::test]
async fn generate_style_response_field_is_used() {
    let mock_server = MockServer::start().await;

    let body = concat!(
        r#"{"response":"plain ","done":false}"#,
        "\n",
        r#"{"response":"text","done":true}"#,
        "\n",
    );
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&mock_server)
        .await;

    let client = OllamaClient::new(&mock_server.uri()).unwrap();
    let response = client.send_message("llama3.2", history()).await.unwrap();
    assert_eq!(response.content, "plain text");
}

#[tokio::test]
async fn malformed_lines_are_skipped() {
    let mock_server = MockServer::start().await;

    let body = concat!(
        r#"{"message":{"role":"assistant","content":"a"},"done":false}"#,
        "\n",
        "this is not json\n",
        r#"{"message":{"role":"assistant","content":"b"},"done":true}"#,
        "\n",
    );
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&mock_server)
        .await;

    let client = OllamaClient::new(&mock_server.uri()).unwrap();
    let response = client.send_message("llama3.2", history()).await.unwrap();
    assert_eq!(response.content, "ab");
}

#[tokio::test]
async fn non_success_status_fails_before_any_fragment() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_json(serde_json::json!({ "error": "model 'nope' not found" })),
        )
        .mount(&mock_server)
        .await;

    let client = OllamaClient::new(&mock_server.uri()).unwrap();
    let err = client.stream_chat("nope", history(), None).await.unwrap_err();

    match err {
        ChatError::HttpStatus { status, message } => {
            assert_eq!(status, 404);
            assert_eq!(message, "model 'nope' not found");
        }
        other => panic!("expected HttpStatus, got: {other:?}"),
    }
}

#[tokio::test]
async fn plain_text_error_body_falls_back_to_status_reason() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&mock_server)
        .await;

    let client = OllamaClient::new(&mock_server.uri()).unwrap();
    let err = client.stream_chat("llama3.2", history(), None).await.unwrap_err();

    assert!(err.is_connection_error());
    assert!(
        matches!(err, ChatError::HttpStatus { status: 500, ref message } if message == "Internal Server Error"),
        "got: {err:?}"
    );
}

#[tokio::test]
async fn unreachable_server_is_a_connection_error() {
    let client = OllamaClient::new("http://127.0.0.1:1").unwrap();
    let err = client.stream_chat("llama3.2", history(), None).await.unwrap_err();
    assert!(matches!(err, ChatError::ConnectionUnreachable { .. }), "got: {err:?}");
}

#[tokio::test]
async fn models_are_listed_from_tags() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "models": [
                { "name": "llama3.2:latest", "size": 2019393189 },
                { "name": "deepseek-r1:1.5b" },
            ]
        })))
        .mount(&mock_server)
        .await;

    let client = OllamaClient::new(&mock_server.uri()).unwrap();
    assert!(client.test_connection().await);
    assert_eq!(
        client.get_available_models().await,
        vec!["llama3.2:latest", "deepseek-r1:1.5b"]
    );
}

#[tokio::test]
async fn unreadable_model_list_is_empty() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"models\": 42"))
        .mount(&mock_server)
        .await;

    let client = OllamaClient::new(&mock_server.uri()).unwrap();
    assert!(client.get_available_models().await.is_empty());
}

#[tokio::test]
async fn probe_fails_on_server_error_and_unreachable_host() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let client = OllamaClient::new(&mock_server.uri()).unwrap();
    assert!(!client.test_connection().await);
    assert!(client.get_available_models().await.is_empty());

    client.set_base_url("http://127.0.0.1:1").unwrap();
    assert!(!client.test_connection().await);
}

#[tokio::test]
async fn base_url_switch_applies_to_next_request() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "models": [{ "name": "on-second" }]
        })))
        .expect(1)
        .mount(&second)
        .await;

    let client = OllamaClient::new(&first.uri()).unwrap();
    client.set_base_url(&format!("{}/", second.uri())).unwrap();

    assert_eq!(client.base_url(), second.uri());
    assert_eq!(client.get_available_models().await, vec!["on-second"]);
    assert!(first.received_requests().await.unwrap().is_empty());
}
