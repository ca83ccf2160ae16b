//! Tokio driver for the Tideline sync machines.
//!
//! `tideline-core` holds the pure state machines; this crate supplies the
//! I/O around them:
//! - [`ws`]: the WebSocket transport (dial, pump, classify closes).
//! - [`http`]: the REST client for history, sends, and the agent fallback.
//! - [`manager`]: drives the connection machine, owns the transport, fans
//!   frames and events out to subscribers.
//! - [`poller`]: runs the history poll schedule against the store.
//! - [`agent`]: agent requests over the socket with FIFO correlation and an
//!   optional HTTP fallback.
//! - [`session`]: the high-level facade tying all of it together.

pub mod agent;
pub mod http;
pub mod manager;
pub mod poller;
pub mod session;
pub mod ws;

pub use agent::{AgentClient, AgentConfig};
pub use http::ApiClient;
pub use manager::{ConnectionManager, Identity, Subscription};
pub use poller::{PollConfig, Poller};
pub use session::{ChatSession, SessionConfig};
