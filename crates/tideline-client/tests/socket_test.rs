//! Tests against live local sockets: a real WebSocket acceptor for the
//! send-path ordering, and a silent TCP listener for connect semantics
//! while a handshake is in flight.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::json;
use tideline_client::{AgentConfig, ChatSession, ConnectionManager, Identity, PollConfig, SessionConfig};
use tideline_core::{ConnectionError, ConnectionState, ReconnectPolicy, SendError};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// WebSocket server that upgrades every connection and records the text
/// frames it receives.
async fn spawn_ws_server() -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let received = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&received);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let sink = Arc::clone(&sink);
            tokio::spawn(async move {
                let Ok(mut socket) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(message)) = socket.next().await {
                    if let Message::Text(text) = message {
                        sink.lock().push(text);
                    }
                }
            });
        }
    });

    (addr, received)
}

/// TCP listener that accepts connections but never answers the WebSocket
/// upgrade, so every dial runs into the handshake timeout.
async fn spawn_silent_listener() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    addr
}

fn session_for(http: &MockServer, ws_addr: SocketAddr) -> ChatSession {
    ChatSession::new(SessionConfig {
        server_base: http.uri(),
        agent_base: http.uri(),
        ws_base: format!("ws://{ws_addr}"),
        identity: Identity {
            user_id: 1,
            token: "token-123".to_string(),
        },
        reconnect: ReconnectPolicy::default(),
        poll: PollConfig {
            interval: Duration::from_secs(60),
        },
        agent: AgentConfig::default(),
    })
}

#[tokio::test]
async fn confirmed_send_echoes_over_socket() {
    let (ws_addr, received) = spawn_ws_server().await;
    let http = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/send"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 42,
            "sender_id": 1,
            "receiver_id": 2,
            "content": "echoed",
            "timestamp": "2026-08-30T12:00:00Z"
        })))
        .expect(1)
        .mount(&http)
        .await;

    let session = session_for(&http, ws_addr);
    session.connect().await.unwrap();
    session.send_message(2, "echoed").await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if received.lock().iter().any(|t| t.contains("send_message")) {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "echo frame never reached the server"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    session.shutdown();
}

#[tokio::test]
async fn rejected_send_stays_off_the_socket() {
    let (ws_addr, received) = spawn_ws_server().await;
    let http = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/send"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&http)
        .await;

    let session = session_for(&http, ws_addr);
    session.connect().await.unwrap();

    let result = session.send_message(2, "never delivered").await;
    assert_eq!(result, Err(SendError::HttpRejected { status: 500 }));

    // Give a stray frame time to arrive before asserting absence.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(
        received.lock().iter().all(|t| !t.contains("send_message")),
        "rejected send must not reach the socket"
    );

    session.shutdown();
}

#[tokio::test]
async fn concurrent_connect_waits_for_the_dial() {
    let addr = spawn_silent_listener().await;
    let manager = Arc::new(ConnectionManager::new(
        format!("ws://{addr}"),
        "token",
        ReconnectPolicy {
            handshake_timeout: Duration::from_millis(600),
            reconnect_interval: Duration::from_secs(60),
            max_attempts: 3,
        },
    ));

    let first = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.connect().await })
    };

    // Join mid-handshake: the second caller must ride out the same dial
    // instead of reporting on an attempt that has not settled.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let started = tokio::time::Instant::now();
    let second = manager.connect().await;
    let waited = started.elapsed();

    assert_eq!(second, Err(ConnectionError::Timeout));
    assert!(
        waited >= Duration::from_millis(250),
        "second connect settled after {waited:?}, before the handshake could"
    );
    assert_eq!(first.await.unwrap(), Err(ConnectionError::Timeout));
}

#[tokio::test]
async fn dialing_is_observable_as_connecting() {
    let addr = spawn_silent_listener().await;
    let manager = Arc::new(ConnectionManager::new(
        format!("ws://{addr}"),
        "token",
        ReconnectPolicy {
            handshake_timeout: Duration::from_secs(5),
            reconnect_interval: Duration::from_secs(60),
            max_attempts: 3,
        },
    ));

    let task = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.connect().await })
    };

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(manager.state(), ConnectionState::Connecting);
    assert_eq!(*manager.state_watch().borrow(), ConnectionState::Connecting);

    task.abort();
}
