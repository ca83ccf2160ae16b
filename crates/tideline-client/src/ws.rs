//! WebSocket transport.
//!
//! Dials the server, pumps frames in both directions, and classifies how the
//! connection ended. The transport is deliberately dumb: it decodes frames
//! and reports them, but all protocol decisions (ping answers, reconnect,
//! correlation) live above it in the manager.
//!
//! Close classification follows the server's close-code table: 1000 is a
//! deliberate close, 4001 and 4004 are credential rejections, everything
//! else (including 1006 and raw stream errors) is abnormal.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tideline_core::{CloseReason, ConnectionError};
use tideline_proto::{ClientFrame, ServerFrame, decode_server_frame, encode_client_frame};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

const OUTBOUND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 64;

/// What the transport reports upward.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A decoded server frame.
    Frame(ServerFrame),
    /// The connection ended. Terminal; nothing follows it.
    Closed(CloseReason),
}

/// Handle to a live WebSocket connection.
///
/// Dropping the outbound sender closes the socket with a normal close code.
pub struct WsTransport {
    outbound: mpsc::Sender<ClientFrame>,
    events: mpsc::Receiver<TransportEvent>,
}

impl WsTransport {
    /// Dial `url` and start the frame pump.
    ///
    /// The timeout covers DNS, TCP, TLS, and the WebSocket upgrade. An HTTP
    /// 401 or 403 during the upgrade maps to
    /// [`ConnectionError::InvalidCredential`].
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, ConnectionError> {
        let connect = tokio_tungstenite::connect_async(url);
        let (socket, _response) = tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| ConnectionError::Timeout)?
            .map_err(classify_dial_error)?;

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(run_connection(socket, outbound_rx, event_tx));

        Ok(Self {
            outbound: outbound_tx,
            events: event_rx,
        })
    }

    /// Split into the outbound sender and the event stream.
    pub fn split(self) -> (mpsc::Sender<ClientFrame>, mpsc::Receiver<TransportEvent>) {
        (self.outbound, self.events)
    }
}

fn classify_dial_error(error: WsError) -> ConnectionError {
    match error {
        WsError::Http(response)
            if response.status().as_u16() == 401 || response.status().as_u16() == 403 =>
        {
            ConnectionError::InvalidCredential
        },
        other => ConnectionError::Network(other.to_string()),
    }
}

/// Map a received close frame to a [`CloseReason`].
fn close_reason(frame: Option<&CloseFrame<'_>>) -> CloseReason {
    let Some(frame) = frame else {
        return CloseReason::Abnormal {
            detail: "closed without close frame".to_string(),
        };
    };

    match u16::from(frame.code) {
        1000 => CloseReason::Deliberate,
        4001 | 4004 => CloseReason::CredentialRejected,
        code => CloseReason::Abnormal {
            detail: format!("close code {code}: {}", frame.reason),
        },
    }
}

async fn run_connection(
    mut socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut outbound: mpsc::Receiver<ClientFrame>,
    events: mpsc::Sender<TransportEvent>,
) {
    let reason = pump(&mut socket, &mut outbound, &events).await;
    let _ = events.send(TransportEvent::Closed(reason)).await;
}

async fn pump(
    socket: &mut WebSocketStream<MaybeTlsStream<TcpStream>>,
    outbound: &mut mpsc::Receiver<ClientFrame>,
    events: &mpsc::Sender<TransportEvent>,
) -> CloseReason {
    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => match encode_client_frame(&frame) {
                    Ok(text) => {
                        if let Err(error) = socket.send(Message::Text(text)).await {
                            return CloseReason::Abnormal { detail: error.to_string() };
                        }
                    },
                    Err(error) => {
                        tracing::warn!(%error, "dropping unencodable outbound frame");
                    },
                },
                None => {
                    // All senders dropped: deliberate teardown.
                    let close = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client disconnect".into(),
                    };
                    let _ = socket.send(Message::Close(Some(close))).await;
                    return CloseReason::Deliberate;
                },
            },
            incoming = socket.next() => match incoming {
                Some(Ok(Message::Text(text))) => match decode_server_frame(&text) {
                    Ok(frame) => {
                        if events.send(TransportEvent::Frame(frame)).await.is_err() {
                            return CloseReason::Deliberate;
                        }
                    },
                    Err(error) => {
                        tracing::warn!(%error, "ignoring malformed server frame");
                    },
                },
                // Protocol-level pings are answered here; application-level
                // pings travel as text frames and are answered by the manager.
                Some(Ok(Message::Ping(payload))) => {
                    let _ = socket.send(Message::Pong(payload)).await;
                },
                Some(Ok(Message::Close(frame))) => {
                    return close_reason(frame.as_ref());
                },
                Some(Ok(_)) => {},
                Some(Err(error)) => {
                    return CloseReason::Abnormal { detail: error.to_string() };
                },
                None => {
                    return CloseReason::Abnormal { detail: "stream ended".to_string() };
                },
            },
        }
    }
}
