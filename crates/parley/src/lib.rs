//! Streaming chat-routing core.
//!
//! Resolves logical agents to interchangeable language-model backends,
//! normalizes their streaming formats into one delta sequence, and maintains
//! a bounded, persisted per-agent conversation history.

pub mod agents;
pub mod backends;
pub mod errors;
pub mod gateway;
pub mod history;
pub mod personas;

pub use agents::{AgentDescriptor, AgentRegistry, BackendKind, FixedPrompt, Loadout};
pub use errors::{GatewayError, GatewayResult};
pub use gateway::{ChatCall, ChatGateway, ChatReply, GatewayConfig, StreamFrame};
pub use history::{FileHistoryStore, HistoryStore, Message, Role};
pub use personas::PersonaTable;
