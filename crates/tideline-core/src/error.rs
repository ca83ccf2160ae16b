//! Error types shared across the sync machines.

/// Why a connection attempt or an established connection failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// The server rejected the authentication token. Not retried
    /// automatically; the caller must supply a fresh token and reconnect.
    #[error("credential rejected by server")]
    InvalidCredential,

    /// The handshake did not complete within the allowed window.
    #[error("connection attempt timed out")]
    Timeout,

    /// Transport-level failure (DNS, TCP, TLS, or the WebSocket upgrade).
    #[error("network error: {0}")]
    Network(String),

    /// The established connection closed without a deliberate close frame.
    #[error("connection closed abnormally: {0}")]
    AbnormalClose(String),
}

impl ConnectionError {
    /// Whether automatic reconnect is appropriate for this failure.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::InvalidCredential)
    }
}

/// Why a message send failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// No connection is established and the operation requires one.
    #[error("not connected")]
    NotConnected,

    /// The server answered with a non-success HTTP status.
    #[error("server rejected request with status {status}")]
    HttpRejected {
        /// HTTP status code.
        status: u16,
    },

    /// The request never reached the server.
    #[error("network error: {0}")]
    Network(String),
}

/// Why an agent command failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AgentError {
    /// No response arrived within the correlation window.
    #[error("agent response timed out")]
    Timeout,

    /// The agent service reported a failure.
    #[error("agent error: {0}")]
    Remote(String),

    /// No connection is established and no fallback path is configured.
    #[error("not connected to agent service")]
    NotConnected,
}

/// Violation of the message ordering invariants, reported by
/// [`crate::MessageStore::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeInvariantViolation {
    /// A server message ID appears more than once in a conversation.
    #[error("duplicate message id {id} in conversation {conversation}")]
    DuplicateId {
        /// Conversation key (the other participant's user ID).
        conversation: u64,
        /// Duplicated server message ID.
        id: u64,
    },

    /// Two adjacent messages are not in timestamp order.
    #[error("messages out of order at index {index} in conversation {conversation}")]
    OutOfOrder {
        /// Conversation key (the other participant's user ID).
        conversation: u64,
        /// Index of the first offending message.
        index: usize,
    },
}
