//! Chat orchestration core
//!
//! Mediates between a messaging front-end and a streaming AI backend. Each
//! conversation is driven by its own state machine; history, modes, agents,
//! functions and the front-end sink are plugged in through the traits below.

pub mod agent;
pub mod chat;
pub mod config;
pub mod error;
pub mod history;
pub mod mode;
pub mod registry;
pub mod sink;
pub mod tools;

#[cfg(test)]
mod testing;

pub use agent::{AgentError, AgentErrorKind, AgentFactory, AiAgent, LoggingAgent, ResponseStream, StreamChunk};
pub use chat::{Chat, ChatId, ChatServices, ChatState, TransitionError};
pub use config::ChatConfig;
pub use error::ChatError;
pub use history::{ChatHistory, ContentItem, Message, Role};
pub use mode::{ChatMode, DirectoryModeSource, ModeFlags, ModeSource, StaticModeSource};
pub use registry::ChatRegistry;
pub use sink::{MessageSink, Notice, Outgoing, SinkError};
pub use tools::{FunctionRegistry, ToolRegistry};
