//! Conversation messages

use super::content::{joined_text, ContentItem, ToolCall};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Process-unique message identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Id assigned by the messaging front-end once a message is delivered.
/// Front-end ids increase with send order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExternalId(pub i64);

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    Assistant,
    User,
    Tool,
}

/// One message of a conversation
#[derive(Debug, Clone)]
pub struct Message {
    pub id: MessageId,
    pub external_id: Option<ExternalId>,
    pub role: Role,
    pub sender: String,
    pub content: Vec<ContentItem>,
    pub created_at: DateTime<Utc>,
    /// For tool messages: the id of the call this message answers
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn new(role: Role, sender: impl Into<String>, content: Vec<ContentItem>) -> Self {
        Self {
            id: MessageId::new(),
            external_id: None,
            role,
            sender: sender.into(),
            content,
            created_at: Utc::now(),
            tool_call_id: None,
        }
    }

    pub fn user(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(Role::User, sender, vec![ContentItem::text(text)])
    }

    pub fn assistant(sender: impl Into<String>, content: Vec<ContentItem>) -> Self {
        Self::new(Role::Assistant, sender, content)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, "system", vec![ContentItem::text(text)])
    }

    /// Result of `call`, folded back into the conversation
    pub fn tool_result(call: &ToolCall, content: Vec<ContentItem>) -> Self {
        let mut message = Self::new(Role::Tool, call.name.clone(), content);
        message.tool_call_id = Some(call.id.clone());
        message
    }

    #[must_use]
    pub fn with_external_id(mut self, id: ExternalId) -> Self {
        self.external_id = Some(id);
        self
    }

    #[must_use]
    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    /// Concatenated text content
    pub fn text(&self) -> String {
        joined_text(&self.content)
    }

    /// Equal apart from identity and timestamps
    pub fn same_content(&self, other: &Message) -> bool {
        self.role == other.role
            && self.sender == other.sender
            && self.tool_call_id == other.tool_call_id
            && self.content.len() == other.content.len()
            && self
                .content
                .iter()
                .zip(&other.content)
                .all(|(a, b)| a.same_content(b))
    }
}
