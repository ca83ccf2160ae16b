//! History poll driver.
//!
//! Runs the [`PollSchedule`] from `tideline-core` against the REST API,
//! merging each fetch into the shared store. One conversation is polled at a
//! time; starting a new one replaces the previous task.
//!
//! The poller never looks at the connection state. When the socket is down
//! these fetches are the only message path, which is exactly when they
//! matter most.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tideline_core::{MessageStore, PollSchedule, UserId};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::http::ApiClient;

/// Poll tuning.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay between history fetches.
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: tideline_core::poller::DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Polls the selected conversation's history into the store.
pub struct Poller {
    api: ApiClient,
    store: Arc<Mutex<MessageStore>>,
    config: PollConfig,
    task: Option<JoinHandle<()>>,
}

impl Poller {
    /// Idle poller over the given API client and store.
    pub fn new(api: ApiClient, store: Arc<Mutex<MessageStore>>, config: PollConfig) -> Self {
        Self {
            api,
            store,
            config,
            task: None,
        }
    }

    /// Begin polling `conversation`, replacing any previous selection.
    pub fn start(&mut self, conversation: UserId) {
        self.stop();
        let api = self.api.clone();
        let store = Arc::clone(&self.store);
        let interval = self.config.interval;
        self.task = Some(tokio::spawn(poll_loop(api, store, conversation, interval)));
    }

    /// Stop polling. Idempotent.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Whether a poll task is running.
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_loop(
    api: ApiClient,
    store: Arc<Mutex<MessageStore>>,
    conversation: UserId,
    interval: Duration,
) {
    let mut schedule: PollSchedule<Instant> = PollSchedule::new();
    schedule.start(conversation, interval, Instant::now());

    loop {
        let wait = schedule
            .time_until_due(Instant::now())
            .unwrap_or(interval);
        tokio::time::sleep(wait).await;

        let Some(target) = schedule.due(Instant::now()) else {
            continue;
        };

        match api.chat_history(target, None, None).await {
            Ok(history) => {
                let stats = store.lock().merge_incoming(target, &history.messages);
                if stats.inserted > 0 || stats.confirmed > 0 {
                    tracing::debug!(
                        conversation = target,
                        inserted = stats.inserted,
                        confirmed = stats.confirmed,
                        "poll merged new messages"
                    );
                }
            },
            // Transient by assumption; the next cycle retries.
            Err(error) => {
                tracing::warn!(conversation = target, %error, "history poll failed");
            },
        }
    }
}
