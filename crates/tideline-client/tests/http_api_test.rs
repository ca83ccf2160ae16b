//! REST client tests against a mock server.

use serde_json::json;
use tideline_client::ApiClient;
use tideline_core::{AgentError, SendError};
use tideline_proto::PromptRequest;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> ApiClient {
    ApiClient::new(server.uri(), server.uri(), "token-123")
}

#[tokio::test]
async fn send_message_posts_body_and_parses_ack() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/send"))
        .and(header("authorization", "Bearer token-123"))
        .and(body_json(json!({"receiver_id": 2, "content": "hi"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 500,
            "sender_id": 1,
            "receiver_id": 2,
            "content": "hi",
            "timestamp": "2026-08-30T12:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let ack = client(&server).send_message(2, "hi").await.unwrap();
    assert_eq!(ack.id, 500);
    assert_eq!(ack.receiver_id, 2);
}

#[tokio::test]
async fn send_message_surfaces_rejection_status() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/send"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let result = client(&server).send_message(2, "hi").await;
    assert_eq!(result, Err(SendError::HttpRejected { status: 500 }));
}

#[tokio::test]
async fn chat_history_passes_pagination() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/chat/history/2"))
        .and(query_param("limit", "50"))
        .and(query_param("offset", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "messages": [{
                "id": 1,
                "sender_id": 2,
                "receiver_id": 1,
                "content": "hey",
                "timestamp": "2026-08-30T11:00:00Z"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let history = client(&server)
        .chat_history(2, Some(50), Some(10))
        .await
        .unwrap();
    assert_eq!(history.messages.len(), 1);
    assert_eq!(history.messages[0].content, "hey");
}

#[tokio::test]
async fn agent_prompt_returns_reply() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/prompt"))
        .and(body_json(json!({"prompt": "summarize"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": "summary here",
            "success": true,
            "tools_used": ["search"]
        })))
        .mount(&server)
        .await;

    let reply = client(&server)
        .agent_prompt(&PromptRequest::new("summarize"))
        .await
        .unwrap();
    assert_eq!(reply.response, "summary here");
    assert_eq!(reply.tools_used, vec!["search".to_string()]);
}

#[tokio::test]
async fn agent_prompt_failure_body_is_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/prompt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": "model unavailable",
            "success": false
        })))
        .mount(&server)
        .await;

    let result = client(&server)
        .agent_prompt(&PromptRequest::new("hello"))
        .await;
    assert_eq!(
        result,
        Err(AgentError::Remote("model unavailable".to_string()))
    );
}

#[tokio::test]
async fn agent_prompt_maps_http_failure() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/prompt"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let result = client(&server)
        .agent_prompt(&PromptRequest::new("hello"))
        .await;
    assert!(matches!(result, Err(AgentError::Remote(detail)) if detail.contains("502")));
}
