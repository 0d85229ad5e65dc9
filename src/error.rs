//! Crate-level error aggregate

use crate::agent::AgentError;
use crate::chat::TransitionError;
use crate::history::HistoryError;
use crate::mode::ModeError;
use crate::sink::SinkError;
use thiserror::Error;

/// Failure of a chat operation or of a transition handler
#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error(transparent)]
    Mode(#[from] ModeError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("no agent available, mode was never applied")]
    NoAgent,
    #[error("mode {0} could not be applied")]
    ModeNotApplied(String),
}

impl ChatError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ChatError::Agent(e) if e.is_cancelled())
    }
}
