//! Wire types for the Tideline chat protocol.
//!
//! The server speaks JSON over two surfaces:
//! - A WebSocket connection carrying tagged frames ([`ServerFrame`],
//!   [`ClientFrame`]).
//! - A REST API for message history, message submission, and agent prompts
//!   ([`rest`]).
//!
//! This crate contains only data types and their JSON codecs. It performs no
//! I/O and holds no state.

pub mod frame;
pub mod rest;

pub use frame::{
    AgentResponseFrame, ClientFrame, ProtocolError, ServerFrame, decode_server_frame,
    encode_client_frame,
};
pub use rest::{HistoryResponse, PromptRequest, PromptResponse, SendMessageRequest, WireMessage};
