//! Pure sync state machines for the Tideline chat client.
//!
//! Everything in this crate is deterministic and free of I/O. Each machine
//! takes inputs (method calls, server data, the current time) and returns
//! values or actions for a driver to execute. Time flows in through explicit
//! `now` parameters, generic over the instant type, so the same logic runs
//! against `std::time::Instant`, a runtime's instant, or a test counter.
//!
//! The machines:
//! - [`MessageStore`]: per-conversation message lists with optimistic sends
//!   and idempotent merging of server snapshots.
//! - [`ConnectionMachine`]: WebSocket connection lifecycle with bounded
//!   automatic reconnect.
//! - [`PollSchedule`]: the fixed-interval history poll for the selected
//!   conversation.
//! - [`AgentCorrelator`]: FIFO correlation of agent commands with their
//!   uncorrelated responses.

pub mod connection;
pub mod correlator;
pub mod error;
pub mod poller;
pub mod store;

pub use connection::{
    CloseReason, ConnectAction, ConnectionEvent, ConnectionMachine, ConnectionState,
    ReconnectPolicy,
};
pub use correlator::{AgentCorrelator, AgentReply, RequestId};
pub use error::{AgentError, ConnectionError, MergeInvariantViolation, SendError};
pub use poller::PollSchedule;
pub use store::{
    ConfirmOutcome, Conversation, DeliveryState, Message, MessageId, MessageStore, MergeStats,
    OptimisticHandle, UserId,
};
