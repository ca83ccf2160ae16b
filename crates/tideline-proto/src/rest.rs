//! REST API payloads.
//!
//! The REST surface covers message submission, history retrieval, and the
//! HTTP fallback for agent prompts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat message as the server represents it.
///
/// Also embedded in [`crate::ServerFrame::NewMessage`] push frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Server-assigned message ID, unique per message.
    pub id: u64,
    /// User ID of the sender.
    pub sender_id: u64,
    /// User ID of the recipient.
    pub receiver_id: u64,
    /// Message body.
    pub content: String,
    /// Server-assigned creation time.
    pub timestamp: DateTime<Utc>,
}

/// Body of `POST /messages`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendMessageRequest {
    /// Recipient user ID.
    pub receiver_id: u64,
    /// Message body.
    pub content: String,
}

/// Body of `GET /messages/{user_id}` responses.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HistoryResponse {
    /// Messages in the conversation, oldest first.
    pub messages: Vec<WireMessage>,
}

/// Body of `POST /prompt` requests to the agent service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptRequest {
    /// Prompt text.
    pub prompt: String,
    /// Sampling temperature override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Completion length cap.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Nucleus sampling override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
}

impl PromptRequest {
    /// Request with the given prompt and server-side default sampling.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            temperature: None,
            max_tokens: None,
            top_p: None,
        }
    }
}

/// Body of `POST /prompt` responses.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PromptResponse {
    /// Reply text.
    pub response: String,
    /// Whether the agent completed the prompt.
    #[serde(default = "default_true")]
    pub success: bool,
    /// Names of tools the agent invoked.
    #[serde(default)]
    pub tools_used: Vec<String>,
}

fn default_true() -> bool {
    true
}
