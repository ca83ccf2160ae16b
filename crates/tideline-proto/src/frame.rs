//! WebSocket frame types.
//!
//! Frames are JSON objects tagged by a `type` field. The server is free to
//! introduce new frame types at any time, so [`ServerFrame`] keeps an
//! [`ServerFrame::Unknown`] catch-all and decoding never fails on an
//! unrecognized tag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rest::WireMessage;

/// Error produced when encoding or decoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame body was not valid JSON or did not match the schema.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Frames received from the server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// A chat message pushed by the server.
    NewMessage {
        /// The pushed message, flattened into the frame body.
        #[serde(flatten)]
        message: WireMessage,
    },

    /// Handshake acknowledgement sent once after the socket opens.
    ConnectionConfirmed {
        /// Authenticated user ID, when the server includes it.
        user_id: Option<u64>,
    },

    /// Server liveness probe. Must be answered with [`ClientFrame::Pong`].
    Ping,

    /// Answer to a client-initiated ping.
    Pong,

    /// Reply to an agent command.
    Response(AgentResponseFrame),

    /// Server-reported failure for an in-flight agent command.
    Error {
        /// Human-readable description, when the server includes one.
        message: Option<String>,
    },

    /// Any frame type this client does not understand. Ignored.
    #[serde(other)]
    Unknown,
}

/// Body of a [`ServerFrame::Response`].
///
/// Older server builds put the reply text under `message` instead of
/// `response`, so both are kept and [`AgentResponseFrame::text`] picks
/// whichever is present.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentResponseFrame {
    /// Reply text (current field name).
    pub response: Option<String>,
    /// Reply text (legacy field name).
    pub message: Option<String>,
    /// Names of tools the agent invoked while producing the reply.
    #[serde(default)]
    pub tools_used: Vec<String>,
    /// Completion status reported by the server.
    pub status: Option<String>,
}

impl AgentResponseFrame {
    /// Reply text, preferring the current field name over the legacy one.
    pub fn text(&self) -> &str {
        self.response
            .as_deref()
            .or(self.message.as_deref())
            .unwrap_or("")
    }
}

/// Frames sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Deliver a chat message to another user.
    SendMessage {
        /// Recipient user ID.
        receiver_id: u64,
        /// Message body.
        content: String,
    },

    /// Mark a message as read.
    MarkRead {
        /// Server ID of the message.
        message_id: u64,
    },

    /// Submit a prompt to the agent.
    Command {
        /// Prompt text.
        content: String,
        /// Client-side submission time.
        timestamp: DateTime<Utc>,
    },

    /// Answer to a [`ServerFrame::Ping`].
    Pong,
}

/// Decode a server frame from its JSON text.
pub fn decode_server_frame(text: &str) -> Result<ServerFrame, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Encode a client frame to JSON text.
pub fn encode_client_frame(frame: &ClientFrame) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(frame)?)
}
