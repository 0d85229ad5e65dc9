//! Messaging front-end interface
//!
//! The core only tells the front-end what to show. How content is rendered,
//! paginated or split is up to the implementation.

use crate::chat::ChatId;
use crate::history::{ContentItem, ExternalId};
use async_trait::async_trait;
use thiserror::Error;

/// Content to deliver, either as a new message or as an edit of one
/// already shown
#[derive(Debug, Clone, Default)]
pub struct Outgoing {
    /// Message to edit in place; `None` sends a new one
    pub replace: Option<ExternalId>,
    pub text: String,
    /// Non-text content of the final version
    pub attachments: Vec<ContentItem>,
    /// False while the message is still streaming
    pub complete: bool,
}

/// Chat-level notices
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The conversation was reset
    Reset,
    /// The last response failed
    Error(String),
    /// The error notice no longer applies
    ErrorCleared,
}

impl Notice {
    pub fn kind(&self) -> &'static str {
        match self {
            Notice::Reset => "reset",
            Notice::Error(_) => "error",
            Notice::ErrorCleared => "error_cleared",
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("message sink failed: {0}")]
pub struct SinkError(pub String);

#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Send or edit a message and return its front-end id
    async fn send_or_edit(&self, chat_id: &ChatId, outgoing: &Outgoing) -> Result<ExternalId, SinkError>;

    async fn notify(&self, chat_id: &ChatId, notice: Notice) -> Result<(), SinkError>;
}
