//! Chat states and triggers

use crate::agent::ResponseStream;
use crate::history::Message;
use crate::mode::ChatMode;
use std::fmt;
use tokio_util::sync::CancellationToken;

/// Identity of one conversation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChatId(String);

impl ChatId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ChatId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ChatId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<i64> for ChatId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Chat state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChatState {
    /// Fresh or reset conversation, nothing said yet
    #[default]
    WaitingForFirstMessage,
    /// Conversation has messages, no response in progress
    WaitingForNewMessages,
    /// Agent request sent, waiting for its stream
    InitiateAiResponse,
    /// Consuming the agent's stream
    Streaming,
    /// Last response failed; an error notice is shown
    Error,
}

impl ChatState {
    pub const ALL: [ChatState; 5] = [
        ChatState::WaitingForFirstMessage,
        ChatState::WaitingForNewMessages,
        ChatState::InitiateAiResponse,
        ChatState::Streaming,
        ChatState::Error,
    ];

    /// True while a response is being produced
    pub fn is_busy(self) -> bool {
        matches!(self, ChatState::InitiateAiResponse | ChatState::Streaming)
    }
}

impl fmt::Display for ChatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChatState::WaitingForFirstMessage => "waiting_for_first_message",
            ChatState::WaitingForNewMessages => "waiting_for_new_messages",
            ChatState::InitiateAiResponse => "initiate_ai_response",
            ChatState::Streaming => "streaming",
            ChatState::Error => "error",
        };
        f.write_str(name)
    }
}

/// How a response is requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Answer the current history
    Request,
    /// Ask the agent to continue its last answer
    Continue,
    /// Drop the last answer and ask again
    Regenerate,
}

/// Triggers with their context
pub enum Trigger {
    UserReset,
    UserSetMode(ChatMode),
    UserAddMessages(Vec<Message>),
    UserRequestResponse(CancellationToken),
    UserContinue(CancellationToken),
    UserRegenerate(CancellationToken),
    UserCancel,
    UserStop,
    /// The agent produced a stream; the token is the caller's
    AiProducedContent(ResponseStream, CancellationToken),
    /// The response is complete; carries the messages to commit
    AiResponseFinished(Vec<Message>),
    /// The response failed; carries the notice text
    AiResponseError(String),
}

impl Trigger {
    pub fn kind(&self) -> TriggerKind {
        match self {
            Trigger::UserReset => TriggerKind::UserReset,
            Trigger::UserSetMode(_) => TriggerKind::UserSetMode,
            Trigger::UserAddMessages(_) => TriggerKind::UserAddMessages,
            Trigger::UserRequestResponse(_) => TriggerKind::UserRequestResponse,
            Trigger::UserContinue(_) => TriggerKind::UserContinue,
            Trigger::UserRegenerate(_) => TriggerKind::UserRegenerate,
            Trigger::UserCancel => TriggerKind::UserCancel,
            Trigger::UserStop => TriggerKind::UserStop,
            Trigger::AiProducedContent(..) => TriggerKind::AiProducedContent,
            Trigger::AiResponseFinished(_) => TriggerKind::AiResponseFinished,
            Trigger::AiResponseError(_) => TriggerKind::AiResponseError,
        }
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::UserSetMode(mode) => f.debug_tuple("UserSetMode").field(&mode.name).finish(),
            Trigger::UserAddMessages(messages) => f
                .debug_tuple("UserAddMessages")
                .field(&messages.len())
                .finish(),
            Trigger::AiProducedContent(stream, _) => f
                .debug_tuple("AiProducedContent")
                .field(stream)
                .finish(),
            Trigger::AiResponseFinished(messages) => f
                .debug_tuple("AiResponseFinished")
                .field(&messages.len())
                .finish(),
            Trigger::AiResponseError(message) => {
                f.debug_tuple("AiResponseError").field(message).finish()
            }
            other => fmt::Display::fmt(&other.kind(), f),
        }
    }
}

/// Trigger discriminant without context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    UserReset,
    UserSetMode,
    UserAddMessages,
    UserRequestResponse,
    UserContinue,
    UserRegenerate,
    UserCancel,
    UserStop,
    AiProducedContent,
    AiResponseFinished,
    AiResponseError,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
