//! Connection lifecycle state machine.
//!
//! Manages the WebSocket connection state, bounded automatic reconnect, and
//! handshake timeouts. Uses the action pattern: methods take time as input
//! and return actions for the driver to execute. This keeps the machine pure
//! (no I/O) and makes testing straightforward.
//!
//! # State Machine
//!
//! ```text
//! ┌──────────────┐ connect  ┌────────────┐ handshake ok ┌───────────┐
//! │ Disconnected │─────────>│ Connecting │─────────────>│ Connected │
//! └──────────────┘          └────────────┘              └───────────┘
//!        ↑                    │        ↑                      │
//!        │ credential         │ retry  │ abnormal close       │
//!        │ rejected /         │ (cap)  └──────────────────────┘
//!        │ disconnect()       ↓
//!        │                ┌────────┐
//!        └────────────────│ Failed │  (terminal until connect())
//!                         └────────┘
//! ```
//!
//! Reconnect runs at a fixed interval. After the attempt cap is exhausted the
//! machine parks in [`ConnectionState::Failed`] and only an explicit
//! [`ConnectionMachine::connect`] restarts it. A credential rejection is
//! never retried automatically.

use std::{
    ops::Sub,
    time::{Duration, Instant},
};

use crate::error::ConnectionError;

/// Time allowed for the transport open plus handshake confirmation.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Fixed delay between reconnect attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(3);

/// Consecutive failed attempts before the machine gives up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Connection state visible to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and none in progress.
    Disconnected,
    /// An attempt is in flight or a retry is scheduled.
    Connecting,
    /// Handshake confirmed; frames flow.
    Connected,
    /// Reconnect attempts exhausted. Cleared only by an explicit connect.
    Failed,
}

/// Why the transport closed, as classified by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// We asked for the close (normal close code).
    Deliberate,
    /// The server rejected our credentials at close time.
    CredentialRejected,
    /// Anything else (network drop, server crash, abnormal close code).
    Abnormal {
        /// Close code or error description.
        detail: String,
    },
}

/// Notifications emitted as the machine changes state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Handshake confirmed.
    Connected,

    /// Connection lost or torn down.
    Disconnected {
        /// The failure that caused it, `None` for a deliberate disconnect.
        error: Option<ConnectionError>,
    },

    /// A retry will fire after the reconnect interval.
    ReconnectScheduled {
        /// 1-based number of the upcoming attempt.
        attempt: u32,
    },

    /// The server rejected our credentials. No automatic retry follows.
    CredentialRejected,

    /// The attempt cap was exhausted.
    Failed {
        /// Attempts made before giving up.
        attempts: u32,
    },
}

/// Actions returned by the connection machine.
///
/// The driver executes these:
/// - `OpenTransport`: dial the WebSocket and report the outcome back via
///   [`ConnectionMachine::handshake_succeeded`] or
///   [`ConnectionMachine::handshake_failed`].
/// - `Notify`: fan the event out to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectAction {
    /// Dial the transport and run the handshake.
    OpenTransport,

    /// Publish this event to subscribers.
    Notify(ConnectionEvent),
}

/// Reconnect tuning.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Time allowed for transport open plus handshake confirmation.
    pub handshake_timeout: Duration,
    /// Fixed delay between attempts.
    pub reconnect_interval: Duration,
    /// Consecutive failed attempts before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Connection lifecycle state machine.
///
/// Pure state machine, no I/O. Time is passed as parameters to the methods
/// that need it, generic over the instant type to support both real time and
/// virtual time in tests.
#[derive(Debug, Clone)]
pub struct ConnectionMachine<I = Instant>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    state: ConnectionState,
    policy: ReconnectPolicy,
    /// Failures since the last explicit connect or successful handshake.
    attempt_count: u32,
    /// Cleared by a deliberate disconnect or a credential rejection.
    auto_reconnect: bool,
    /// When the in-flight attempt started. `None` when no attempt is open.
    attempt_started: Option<I>,
    /// Monotonic dial counter pairing a driver dial with the attempt that
    /// requested it.
    attempt_token: u64,
    /// When the last failure happened. The next retry fires one reconnect
    /// interval after this.
    last_failure: Option<I>,
    last_error: Option<ConnectionError>,
}

impl<I> ConnectionMachine<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// New machine in [`ConnectionState::Disconnected`].
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            policy,
            attempt_count: 0,
            auto_reconnect: false,
            attempt_started: None,
            attempt_token: 0,
            last_failure: None,
            last_error: None,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The most recent connection failure, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<&ConnectionError> {
        self.last_error.as_ref()
    }

    /// Failures since the last explicit connect or successful handshake.
    #[must_use]
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Token identifying the in-flight dial, `None` when no attempt is open.
    ///
    /// A driver captures the token when it starts a dial and checks it again
    /// before reporting the outcome. A mismatch means the machine already
    /// timed the attempt out and the report is stale; applying it anyway
    /// would burn a second attempt from the budget for the same dial.
    #[must_use]
    pub fn current_attempt(&self) -> Option<u64> {
        self.attempt_started.is_some().then_some(self.attempt_token)
    }

    /// Begin connecting, resetting the attempt budget.
    ///
    /// Idempotent: a no-op while already connecting or connected. Clears
    /// [`ConnectionState::Failed`] and re-enables automatic reconnect.
    pub fn connect(&mut self, now: I) -> Vec<ConnectAction> {
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            return vec![];
        }

        self.attempt_count = 0;
        self.auto_reconnect = true;
        self.last_error = None;
        self.begin_attempt(now)
    }

    /// The driver completed the handshake.
    pub fn handshake_succeeded(&mut self, _now: I) -> Vec<ConnectAction> {
        if self.state != ConnectionState::Connecting {
            return vec![];
        }

        self.state = ConnectionState::Connected;
        self.attempt_count = 0;
        self.attempt_started = None;
        self.last_failure = None;
        vec![ConnectAction::Notify(ConnectionEvent::Connected)]
    }

    /// The driver's attempt failed before the handshake completed.
    pub fn handshake_failed(&mut self, error: ConnectionError, now: I) -> Vec<ConnectAction> {
        if self.state != ConnectionState::Connecting {
            return vec![];
        }

        self.attempt_started = None;
        let transient = error.is_transient();
        self.last_error = Some(error);

        if !transient {
            self.auto_reconnect = false;
            self.state = ConnectionState::Disconnected;
            return vec![ConnectAction::Notify(ConnectionEvent::CredentialRejected)];
        }

        self.attempt_count += 1;
        if self.attempt_count >= self.policy.max_attempts {
            self.state = ConnectionState::Failed;
            return vec![ConnectAction::Notify(ConnectionEvent::Failed {
                attempts: self.attempt_count,
            })];
        }

        self.last_failure = Some(now);
        vec![ConnectAction::Notify(ConnectionEvent::ReconnectScheduled {
            attempt: self.attempt_count + 1,
        })]
    }

    /// An established connection closed.
    ///
    /// Ignored unless currently connected; close races after a deliberate
    /// teardown must not restart the machine.
    pub fn transport_closed(&mut self, reason: CloseReason, now: I) -> Vec<ConnectAction> {
        if self.state != ConnectionState::Connected {
            return vec![];
        }

        match reason {
            CloseReason::Deliberate => {
                self.state = ConnectionState::Disconnected;
                self.auto_reconnect = false;
                vec![ConnectAction::Notify(ConnectionEvent::Disconnected {
                    error: None,
                })]
            },
            CloseReason::CredentialRejected => {
                self.state = ConnectionState::Disconnected;
                self.auto_reconnect = false;
                self.last_error = Some(ConnectionError::InvalidCredential);
                vec![
                    ConnectAction::Notify(ConnectionEvent::Disconnected {
                        error: Some(ConnectionError::InvalidCredential),
                    }),
                    ConnectAction::Notify(ConnectionEvent::CredentialRejected),
                ]
            },
            CloseReason::Abnormal { detail } => {
                let error = ConnectionError::AbnormalClose(detail);
                self.last_error = Some(error.clone());

                if !self.auto_reconnect {
                    self.state = ConnectionState::Disconnected;
                    return vec![ConnectAction::Notify(ConnectionEvent::Disconnected {
                        error: Some(error),
                    })];
                }

                // Fresh attempt budget for each established connection.
                self.attempt_count = 0;
                self.state = ConnectionState::Connecting;
                self.last_failure = Some(now);
                vec![
                    ConnectAction::Notify(ConnectionEvent::Disconnected { error: Some(error) }),
                    ConnectAction::Notify(ConnectionEvent::ReconnectScheduled { attempt: 1 }),
                ]
            },
        }
    }

    /// Tear down deliberately. Suppresses automatic reconnect.
    pub fn disconnect(&mut self) -> Vec<ConnectAction> {
        if self.state == ConnectionState::Disconnected {
            return vec![];
        }

        self.state = ConnectionState::Disconnected;
        self.auto_reconnect = false;
        self.attempt_started = None;
        self.last_failure = None;
        vec![ConnectAction::Notify(ConnectionEvent::Disconnected {
            error: None,
        })]
    }

    /// Process periodic maintenance (handshake timeout and scheduled
    /// retries). Call at a granularity finer than the reconnect interval.
    pub fn tick(&mut self, now: I) -> Vec<ConnectAction> {
        if self.state != ConnectionState::Connecting {
            return vec![];
        }

        if let Some(started) = self.attempt_started {
            if now - started >= self.policy.handshake_timeout {
                return self.handshake_failed(ConnectionError::Timeout, now);
            }
            return vec![];
        }

        if let Some(failed_at) = self.last_failure {
            if now - failed_at >= self.policy.reconnect_interval {
                return self.begin_attempt(now);
            }
        }

        vec![]
    }

    fn begin_attempt(&mut self, now: I) -> Vec<ConnectAction> {
        self.state = ConnectionState::Connecting;
        self.attempt_started = Some(now);
        self.attempt_token += 1;
        self.last_failure = None;
        vec![ConnectAction::OpenTransport]
    }
}

impl<I> Default for ConnectionMachine<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    fn default() -> Self {
        Self::new(ReconnectPolicy::default())
    }
}
