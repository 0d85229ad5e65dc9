//! Effects produced by state transitions

use super::state::ResponseKind;
use crate::agent::ResponseStream;
use crate::history::Message;
use crate::mode::ChatMode;
use tokio_util::sync::CancellationToken;

/// Effects to be executed, in order, after a state transition
#[derive(Debug)]
pub enum Effect {
    /// Clear the history
    ResetHistory,

    /// Entry hook of a reset: tell the front-end
    RunResetHook,

    /// Replace the mode and recreate the agent
    ReplaceMode(ChatMode),

    /// Append user messages to the history
    AppendMessages(Vec<Message>),

    /// Cancel the response in flight and discard its partial output
    AbandonResponse,

    /// Prepare the history and start an agent request in the background
    StartResponse {
        kind: ResponseKind,
        cancel: CancellationToken,
    },

    /// Abandon the response in flight, replace the mode, and request a new
    /// response under it
    RestartResponse(ChatMode),

    /// Consume a response stream in the background
    ConsumeStream {
        stream: ResponseStream,
        cancel: CancellationToken,
    },

    /// Cancel the response in flight and keep what it produced so far
    StopResponse,

    /// Commit a finished response to the history
    CommitResponse(Vec<Message>),

    /// Entry of the error state
    ShowErrorNotice(String),

    /// Exit of the error state
    ClearErrorNotice,
}
