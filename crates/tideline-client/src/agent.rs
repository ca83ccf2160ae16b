//! Agent request driver.
//!
//! Sends agent commands over the chat socket and resolves their responses
//! through the FIFO [`AgentCorrelator`]. Each submission parks a oneshot
//! waiter keyed by request ID; whichever resolution arrives first (response,
//! server error, or timeout) takes the waiter out of the map, so a request
//! resolves exactly once.
//!
//! When the socket is down (or a send fails mid-flight) the request falls
//! back to the HTTP prompt endpoint if one is configured.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tideline_core::correlator::{DEFAULT_RESPONSE_TIMEOUT, Resolution};
use tideline_core::{AgentCorrelator, AgentError, AgentReply, RequestId};
use tideline_proto::{ClientFrame, PromptRequest, ServerFrame};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::http::ApiClient;
use crate::manager::{ConnectionManager, Subscription};

/// Agent request tuning.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Time a request may wait for its response.
    pub response_timeout: Duration,
    /// How often pending requests are checked for expiry.
    pub tick_interval: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            tick_interval: Duration::from_secs(1),
        }
    }
}

type Waiters = Arc<Mutex<HashMap<RequestId, oneshot::Sender<Result<AgentReply, AgentError>>>>>;

/// Client for agent prompts.
pub struct AgentClient {
    manager: Arc<ConnectionManager>,
    fallback: Option<ApiClient>,
    correlator: Arc<Mutex<AgentCorrelator<Instant>>>,
    waiters: Waiters,
    tick_task: JoinHandle<()>,
    _frame_subscription: Subscription,
}

impl AgentClient {
    /// Client over `manager`, optionally falling back to the HTTP prompt
    /// endpoint when no socket is available.
    pub fn new(
        manager: Arc<ConnectionManager>,
        fallback: Option<ApiClient>,
        config: AgentConfig,
    ) -> Self {
        let correlator = Arc::new(Mutex::new(AgentCorrelator::new(config.response_timeout)));
        let waiters: Waiters = Arc::new(Mutex::new(HashMap::new()));

        let frame_subscription = {
            let correlator = Arc::clone(&correlator);
            let waiters = Arc::clone(&waiters);
            manager.on_frame(move |frame| match frame {
                ServerFrame::Response(body) => {
                    let reply = AgentReply {
                        text: body.text().to_string(),
                        tools_used: body.tools_used.clone(),
                    };
                    let resolution = correlator.lock().resolve_response(reply);
                    deliver(&waiters, resolution);
                },
                ServerFrame::Error { message } => {
                    let detail = message
                        .clone()
                        .unwrap_or_else(|| "agent error".to_string());
                    let resolution = correlator.lock().resolve_error(detail);
                    deliver(&waiters, resolution);
                },
                _ => {},
            })
        };

        let tick_task = {
            let correlator = Arc::clone(&correlator);
            let waiters = Arc::clone(&waiters);
            let tick_interval = config.tick_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(tick_interval);
                loop {
                    ticker.tick().await;
                    let expired = correlator.lock().tick(Instant::now());
                    for resolution in expired {
                        deliver(&waiters, Some(resolution));
                    }
                }
            })
        };

        Self {
            manager,
            fallback,
            correlator,
            waiters,
            tick_task,
            _frame_subscription: frame_subscription,
        }
    }

    /// Submit a prompt and wait for the reply.
    ///
    /// Over the socket the reply is matched FIFO; requests submitted while
    /// disconnected go straight to the HTTP fallback, and
    /// [`AgentError::NotConnected`] is returned when none is configured.
    pub async fn submit(&self, prompt: &str) -> Result<AgentReply, AgentError> {
        if !self.manager.is_connected() {
            return self.fallback_prompt(prompt).await;
        }

        let id = self.correlator.lock().submit(Instant::now());
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().insert(id, tx);

        let frame = ClientFrame::Command {
            content: prompt.to_string(),
            timestamp: Utc::now(),
        };

        if let Err(error) = self.manager.send(frame).await {
            self.correlator.lock().cancel(id);
            self.waiters.lock().remove(&id);
            tracing::debug!(%error, "socket send failed, using http fallback");
            return self.fallback_prompt(prompt).await;
        }

        match rx.await {
            Ok(outcome) => outcome,
            // Sender dropped only on shutdown.
            Err(_) => Err(AgentError::Timeout),
        }
    }

    /// Requests currently awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.correlator.lock().pending_len()
    }

    async fn fallback_prompt(&self, prompt: &str) -> Result<AgentReply, AgentError> {
        let Some(api) = &self.fallback else {
            return Err(AgentError::NotConnected);
        };

        let response = api.agent_prompt(&PromptRequest::new(prompt)).await?;
        Ok(AgentReply {
            text: response.response,
            tools_used: response.tools_used,
        })
    }
}

impl Drop for AgentClient {
    fn drop(&mut self) {
        self.tick_task.abort();
    }
}

/// Hand a resolution to its waiter, if one is still parked.
///
/// Taking the sender out of the map before using it is what makes
/// resolution exactly-once: a later resolution for the same ID finds the
/// slot empty.
fn deliver(waiters: &Waiters, resolution: Option<Resolution>) {
    let Some((id, outcome)) = resolution else {
        tracing::debug!("discarding uncorrelated agent response");
        return;
    };

    if let Some(tx) = waiters.lock().remove(&id) {
        let _ = tx.send(outcome);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tideline_core::ReconnectPolicy;

    use super::*;

    #[tokio::test]
    async fn deliver_resolves_each_waiter_once() {
        let waiters: Waiters = Arc::new(Mutex::new(HashMap::new()));
        let (tx, mut rx) = oneshot::channel();
        waiters.lock().insert(RequestId(1), tx);

        let reply = AgentReply {
            text: "hello".into(),
            tools_used: vec![],
        };
        deliver(&waiters, Some((RequestId(1), Ok(reply.clone()))));
        assert_eq!(rx.try_recv().unwrap(), Ok(reply));

        // A second resolution for the same ID finds nothing to do.
        deliver(
            &waiters,
            Some((RequestId(1), Err(AgentError::Timeout))),
        );
        assert!(waiters.lock().is_empty());
    }

    #[tokio::test]
    async fn submit_without_connection_or_fallback_fails() {
        let manager = Arc::new(ConnectionManager::new(
            "ws://localhost:0",
            "token",
            ReconnectPolicy::default(),
        ));
        let agent = AgentClient::new(manager, None, AgentConfig::default());

        let result = agent.submit("hello").await;
        assert_eq!(result, Err(AgentError::NotConnected));
        assert_eq!(agent.pending_requests(), 0);
    }
}
