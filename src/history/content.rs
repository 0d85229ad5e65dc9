//! Content items carried by messages

use super::media::Media;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A function call requested by the agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// One piece of message content
#[derive(Debug, Clone)]
pub enum ContentItem {
    Text(String),
    Json(Value),
    Image(Media),
    Audio(Media),
    Document(Media),
    Video(Media),
    /// Structured function-call request emitted by the agent
    ToolUse(ToolCall),
}

impl ContentItem {
    pub fn text(s: impl Into<String>) -> Self {
        ContentItem::Text(s.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentItem::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_tool_use(&self) -> Option<&ToolCall> {
        match self {
            ContentItem::ToolUse(call) => Some(call),
            _ => None,
        }
    }

    pub fn media(&self) -> Option<&Media> {
        match self {
            ContentItem::Image(media)
            | ContentItem::Audio(media)
            | ContentItem::Document(media)
            | ContentItem::Video(media) => Some(media),
            _ => None,
        }
    }

    /// Content-level equality: media compares by mime type and source
    /// (inline payload or remote reference), never by load state.
    pub fn same_content(&self, other: &ContentItem) -> bool {
        match (self, other) {
            (ContentItem::Text(a), ContentItem::Text(b)) => a == b,
            (ContentItem::Json(a), ContentItem::Json(b)) => a == b,
            (ContentItem::ToolUse(a), ContentItem::ToolUse(b)) => a == b,
            (a, b) => match (a.media(), b.media()) {
                (Some(x), Some(y)) => {
                    std::mem::discriminant(a) == std::mem::discriminant(b)
                        && x.mime_type == y.mime_type
                        && x.url() == y.url()
                        && x.inline_data() == y.inline_data()
                }
                _ => false,
            },
        }
    }
}

/// Concatenated text of a content list
pub fn joined_text(content: &[ContentItem]) -> String {
    content
        .iter()
        .filter_map(ContentItem::as_text)
        .collect::<Vec<_>>()
        .join("")
}

/// Tool calls present in a content list
pub fn tool_calls(content: &[ContentItem]) -> Vec<ToolCall> {
    content
        .iter()
        .filter_map(ContentItem::as_tool_use)
        .cloned()
        .collect()
}
