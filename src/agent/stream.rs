//! Streamed agent responses

use super::AgentError;
use crate::history::ContentItem;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::fmt;

/// One item of a response stream
#[derive(Debug, Clone)]
pub enum StreamChunk {
    /// Incremental text
    Text(String),
    /// Final structured content, including tool-call requests
    Content(Vec<ContentItem>),
}

/// Handle over a streamed response: ordered text deltas, then the final
/// structured content.
pub struct ResponseStream {
    chunks: BoxStream<'static, Result<StreamChunk, AgentError>>,
    text: String,
    content: Option<Vec<ContentItem>>,
}

impl ResponseStream {
    pub fn new<S>(chunks: S) -> Self
    where
        S: Stream<Item = Result<StreamChunk, AgentError>> + Send + 'static,
    {
        Self {
            chunks: chunks.boxed(),
            text: String::new(),
            content: None,
        }
    }

    /// Stream over a fixed list of chunks
    pub fn from_chunks(chunks: Vec<Result<StreamChunk, AgentError>>) -> Self {
        Self::new(futures::stream::iter(chunks))
    }

    /// Next text delta. Structured content chunks are captured on the way.
    /// `None` once the stream has ended.
    pub async fn next_delta(&mut self) -> Option<Result<String, AgentError>> {
        loop {
            match self.chunks.next().await? {
                Ok(StreamChunk::Text(delta)) => {
                    if delta.is_empty() {
                        continue;
                    }
                    self.text.push_str(&delta);
                    return Some(Ok(delta));
                }
                Ok(StreamChunk::Content(items)) => self.content = Some(items),
                Err(e) => return Some(Err(e)),
            }
        }
    }

    /// Text received so far
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Final content. Without a structured chunk this is the accumulated
    /// text.
    pub fn into_content(self) -> Vec<ContentItem> {
        match self.content {
            Some(items) => items,
            None if self.text.is_empty() => Vec::new(),
            None => vec![ContentItem::Text(self.text)],
        }
    }
}

impl fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseStream")
            .field("received_chars", &self.text.len())
            .field("has_content", &self.content.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{joined_text, ToolCall};
    use serde_json::json;

    #[tokio::test]
    async fn test_deltas_in_order_then_text_content() {
        let mut stream = ResponseStream::from_chunks(vec![
            Ok(StreamChunk::Text("Hel".into())),
            Ok(StreamChunk::Text(String::new())),
            Ok(StreamChunk::Text("lo".into())),
        ]);

        assert_eq!(stream.next_delta().await.unwrap().unwrap(), "Hel");
        assert_eq!(stream.next_delta().await.unwrap().unwrap(), "lo");
        assert!(stream.next_delta().await.is_none());
        assert_eq!(joined_text(&stream.into_content()), "Hello");
    }

    #[tokio::test]
    async fn test_structured_content_wins() {
        let call = ToolCall::new("c1", "current_time", json!({}));
        let mut stream = ResponseStream::from_chunks(vec![
            Ok(StreamChunk::Text("Checking".into())),
            Ok(StreamChunk::Content(vec![
                ContentItem::text("Checking"),
                ContentItem::ToolUse(call.clone()),
            ])),
        ]);

        while let Some(delta) = stream.next_delta().await {
            delta.unwrap();
        }
        let content = stream.into_content();
        assert_eq!(content.len(), 2);
        assert_eq!(content[1].as_tool_use(), Some(&call));
    }

    #[tokio::test]
    async fn test_error_is_surfaced() {
        let mut stream = ResponseStream::from_chunks(vec![
            Ok(StreamChunk::Text("a".into())),
            Err(AgentError::network("reset by peer")),
        ]);
        assert!(stream.next_delta().await.unwrap().is_ok());
        let err = stream.next_delta().await.unwrap().unwrap_err();
        assert_eq!(err.message, "reset by peer");
        assert_eq!(stream.text(), "a");
    }
}
