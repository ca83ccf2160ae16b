//! REST client.
//!
//! Covers the three HTTP surfaces: message submission (the authoritative
//! send path), conversation history (initial load and polling), and the
//! agent prompt endpoint used as a fallback when the socket is down.

use tideline_core::{AgentError, SendError, UserId};
use tideline_proto::{
    HistoryResponse, PromptRequest, PromptResponse, SendMessageRequest, WireMessage,
};

/// HTTP client for the chat server and the agent service.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    server_base: String,
    agent_base: String,
    token: String,
}

impl ApiClient {
    /// Client for the given base URLs (no trailing slash) and bearer token.
    pub fn new(
        server_base: impl Into<String>,
        agent_base: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            server_base: server_base.into(),
            agent_base: agent_base.into(),
            token: token.into(),
        }
    }

    /// Same endpoints with a fresh bearer token.
    #[must_use]
    pub fn with_token(&self, token: impl Into<String>) -> Self {
        Self {
            client: self.client.clone(),
            server_base: self.server_base.clone(),
            agent_base: self.agent_base.clone(),
            token: token.into(),
        }
    }

    /// Submit a message. The response carries the server-assigned ID and
    /// timestamp used to confirm the optimistic entry.
    pub async fn send_message(
        &self,
        receiver_id: UserId,
        content: &str,
    ) -> Result<WireMessage, SendError> {
        let body = SendMessageRequest {
            receiver_id,
            content: content.to_string(),
        };

        let response = self
            .client
            .post(format!("{}/chat/send", self.server_base))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| SendError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SendError::HttpRejected {
                status: status.as_u16(),
            });
        }

        response
            .json::<WireMessage>()
            .await
            .map_err(|e| SendError::Network(e.to_string()))
    }

    /// Fetch the conversation with `other`, oldest first.
    pub async fn chat_history(
        &self,
        other: UserId,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<HistoryResponse, SendError> {
        let mut request = self
            .client
            .get(format!("{}/chat/history/{other}", self.server_base))
            .bearer_auth(&self.token);

        if let Some(limit) = limit {
            request = request.query(&[("limit", limit)]);
        }
        if let Some(offset) = offset {
            request = request.query(&[("offset", offset)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SendError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SendError::HttpRejected {
                status: status.as_u16(),
            });
        }

        response
            .json::<HistoryResponse>()
            .await
            .map_err(|e| SendError::Network(e.to_string()))
    }

    /// Submit a prompt over HTTP. Fallback for when the agent socket is
    /// unavailable; slower, but correlation-free.
    pub async fn agent_prompt(&self, request: &PromptRequest) -> Result<PromptResponse, AgentError> {
        let response = self
            .client
            .post(format!("{}/prompt", self.agent_base))
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await
            .map_err(|e| AgentError::Remote(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::Remote(format!(
                "prompt endpoint returned status {}",
                status.as_u16()
            )));
        }

        let body = response
            .json::<PromptResponse>()
            .await
            .map_err(|e| AgentError::Remote(e.to_string()))?;

        if !body.success {
            return Err(AgentError::Remote(body.response));
        }

        Ok(body)
    }
}
