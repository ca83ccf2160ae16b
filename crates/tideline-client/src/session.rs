//! High-level chat session.
//!
//! Ties the pieces together behind one facade: the store, the connection
//! manager, the poller, and the agent client. This is the API an application
//! embeds.
//!
//! # Send path
//!
//! Sends are dual-path. The message is inserted optimistically and submitted
//! over HTTP, whose response is authoritative and confirms the entry. Only
//! after the server accepts it does a real-time echo frame go out over the
//! socket, so a rejected send never reaches the peer and retrying it cannot
//! produce a duplicate. The store's merge logic absorbs the server's own
//! push echo if it beats the HTTP response.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tideline_core::{
    AgentError, AgentReply, ConnectionError, ConnectionState, Conversation, MessageStore,
    ReconnectPolicy, SendError, UserId,
};
use tideline_proto::{ClientFrame, ServerFrame};

use crate::agent::{AgentClient, AgentConfig};
use crate::http::ApiClient;
use crate::manager::{ConnectionManager, Identity, Subscription};
use crate::poller::{PollConfig, Poller};

/// Everything needed to open a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Chat server REST base URL, no trailing slash.
    pub server_base: String,
    /// Agent service REST base URL, no trailing slash.
    pub agent_base: String,
    /// WebSocket base URL, no trailing slash.
    pub ws_base: String,
    /// Who we are.
    pub identity: Identity,
    /// Reconnect tuning.
    pub reconnect: ReconnectPolicy,
    /// Poll tuning.
    pub poll: PollConfig,
    /// Agent request tuning.
    pub agent: AgentConfig,
}

/// One user's live chat session.
pub struct ChatSession {
    me: UserId,
    store: Arc<Mutex<MessageStore>>,
    api: ApiClient,
    manager: Arc<ConnectionManager>,
    agent: AgentClient,
    poller: Mutex<Poller>,
    _push_subscription: Subscription,
}

impl ChatSession {
    /// Build the session. No I/O happens until [`Self::connect`] or one of
    /// the REST operations is called.
    pub fn new(config: SessionConfig) -> Self {
        let me = config.identity.user_id;
        let api = ApiClient::new(
            config.server_base,
            config.agent_base,
            config.identity.token.clone(),
        );
        let manager = Arc::new(ConnectionManager::new(
            config.ws_base,
            config.identity.token,
            config.reconnect,
        ));
        let store = Arc::new(Mutex::new(MessageStore::new(me)));

        // Push frames merge straight into the store through the same path
        // poll results take.
        let push_subscription = {
            let store = Arc::clone(&store);
            manager.on_frame(move |frame| {
                if let ServerFrame::NewMessage { message } = frame {
                    let mut store = store.lock();
                    let other = store.conversation_key(message);
                    store.merge_incoming(other, std::slice::from_ref(message));
                }
            })
        };

        let agent = AgentClient::new(Arc::clone(&manager), Some(api.clone()), config.agent);
        let poller = Mutex::new(Poller::new(api.clone(), Arc::clone(&store), config.poll));

        Self {
            me,
            store,
            api,
            manager,
            agent,
            poller,
            _push_subscription: push_subscription,
        }
    }

    /// Our user ID.
    pub fn user_id(&self) -> UserId {
        self.me
    }

    /// Open the WebSocket connection.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        self.manager.connect().await
    }

    /// Close the WebSocket connection deliberately.
    pub fn disconnect(&self) {
        self.manager.disconnect();
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// The connection manager, for event subscriptions.
    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Send a message to `other`.
    ///
    /// Inserts optimistically and submits over HTTP; the response confirms
    /// the entry and a real-time echo frame follows over the socket when
    /// connected. On HTTP failure the entry is marked failed, stays visible
    /// for retry, and nothing is sent over the socket.
    pub async fn send_message(&self, other: UserId, content: &str) -> Result<(), SendError> {
        let handle = self
            .store
            .lock()
            .append_optimistic(other, content, Utc::now());

        match self.api.send_message(other, content).await {
            Ok(wire) => {
                self.store.lock().confirm(handle, &wire);

                // Best effort: the server already has the message, the echo
                // only speeds up delivery to the peer.
                if self.manager.is_connected() {
                    let frame = ClientFrame::SendMessage {
                        receiver_id: other,
                        content: content.to_string(),
                    };
                    if let Err(error) = self.manager.send(frame).await {
                        tracing::debug!(%error, "realtime echo skipped");
                    }
                }
                Ok(())
            },
            Err(error) => {
                self.store.lock().mark_failed(handle);
                Err(error)
            },
        }
    }

    /// Select the conversation with `other`: load its history now, mark it
    /// read, and start polling it.
    pub async fn select_conversation(&self, other: UserId) -> Result<(), SendError> {
        let history = self.api.chat_history(other, None, None).await?;

        let read_ids = {
            let mut store = self.store.lock();
            store.merge_incoming(other, &history.messages);
            store.mark_read(other)
        };

        // Read receipts are best effort; the server reconciles on the next
        // history fetch anyway.
        if self.manager.is_connected() {
            for message_id in read_ids {
                let _ = self.manager.send(ClientFrame::MarkRead { message_id }).await;
            }
        }

        self.poller.lock().start(other);
        Ok(())
    }

    /// Load a history page for `other` through the same merge path pushes
    /// and polls take, without changing the selection.
    pub async fn load_history(
        &self,
        other: UserId,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<(), SendError> {
        let history = self.api.chat_history(other, limit, offset).await?;
        self.store.lock().merge_incoming(other, &history.messages);
        Ok(())
    }

    /// Deselect the current conversation and stop polling.
    pub fn clear_selection(&self) {
        self.poller.lock().stop();
    }

    /// Whether a conversation is currently being polled.
    pub fn is_polling(&self) -> bool {
        self.poller.lock().is_active()
    }

    /// Ask the agent. Uses the socket when connected, the HTTP prompt
    /// endpoint otherwise.
    pub async fn ask_agent(&self, prompt: &str) -> Result<AgentReply, AgentError> {
        self.agent.submit(prompt).await
    }

    /// Snapshot of the conversation with `other`.
    pub fn conversation(&self, other: UserId) -> Option<Conversation> {
        self.store.lock().conversation(other).cloned()
    }

    /// Snapshot of every conversation.
    pub fn conversations(&self) -> Vec<Conversation> {
        self.store.lock().conversations().cloned().collect()
    }

    /// Stop polling and close the connection.
    pub fn shutdown(&self) {
        self.poller.lock().stop();
        self.manager.disconnect();
    }
}
