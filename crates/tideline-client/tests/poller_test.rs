//! Poller tests against a mock history endpoint.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tideline_client::{ApiClient, PollConfig, Poller};
use tideline_core::MessageStore;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn history_body(id: u64, sender: u64, receiver: u64, content: &str) -> serde_json::Value {
    json!({
        "messages": [{
            "id": id,
            "sender_id": sender,
            "receiver_id": receiver,
            "content": content,
            "timestamp": "2026-08-30T12:00:00Z"
        }]
    })
}

#[tokio::test]
async fn poll_merges_history_into_store() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/history/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(history_body(1, 7, 1, "polled")))
        .expect(1..)
        .mount(&server)
        .await;

    let store = Arc::new(Mutex::new(MessageStore::new(1)));
    let api = ApiClient::new(server.uri(), server.uri(), "token");
    let mut poller = Poller::new(
        api,
        Arc::clone(&store),
        PollConfig {
            interval: Duration::from_millis(50),
        },
    );

    poller.start(7);
    assert!(poller.is_active());
    tokio::time::sleep(Duration::from_millis(250)).await;

    let conversation = store.lock().conversation(7).cloned().unwrap();
    assert_eq!(conversation.messages.len(), 1);
    assert_eq!(conversation.messages[0].content, "polled");

    poller.stop();
    assert!(!poller.is_active());
}

#[tokio::test]
async fn repeated_polls_stay_idempotent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/history/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(history_body(1, 7, 1, "same")))
        .expect(2..)
        .mount(&server)
        .await;

    let store = Arc::new(Mutex::new(MessageStore::new(1)));
    let api = ApiClient::new(server.uri(), server.uri(), "token");
    let mut poller = Poller::new(
        api,
        Arc::clone(&store),
        PollConfig {
            interval: Duration::from_millis(40),
        },
    );

    poller.start(7);
    tokio::time::sleep(Duration::from_millis(300)).await;
    poller.stop();

    // Several polls of the same snapshot leave exactly one message.
    assert_eq!(store.lock().conversation(7).unwrap().messages.len(), 1);
}

#[tokio::test]
async fn starting_a_new_conversation_replaces_the_old_poll() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/history/9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(history_body(2, 9, 1, "ninth")))
        .expect(1..)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/chat/history/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(history_body(1, 7, 1, "seventh")))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(Mutex::new(MessageStore::new(1)));
    let api = ApiClient::new(server.uri(), server.uri(), "token");
    let mut poller = Poller::new(
        api,
        Arc::clone(&store),
        PollConfig {
            interval: Duration::from_millis(50),
        },
    );

    // Conversation 7 is replaced before its first poll fires.
    poller.start(7);
    poller.start(9);
    tokio::time::sleep(Duration::from_millis(200)).await;
    poller.stop();

    assert!(store.lock().conversation(7).is_none());
    assert_eq!(store.lock().conversation(9).unwrap().messages.len(), 1);
}

#[tokio::test]
async fn poll_errors_do_not_stop_the_loop() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/history/7"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2..)
        .mount(&server)
        .await;

    let store = Arc::new(Mutex::new(MessageStore::new(1)));
    let api = ApiClient::new(server.uri(), server.uri(), "token");
    let mut poller = Poller::new(
        api,
        Arc::clone(&store),
        PollConfig {
            interval: Duration::from_millis(40),
        },
    );

    poller.start(7);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(poller.is_active());
    poller.stop();
}
