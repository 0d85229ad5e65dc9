//! AI agent abstraction
//!
//! The core hands an agent the full message list and gets back a stream.
//! How an agent talks to its backend is not the core's concern.

mod error;
mod stream;

pub use error::{AgentError, AgentErrorKind};
pub use stream::{ResponseStream, StreamChunk};

use crate::history::Message;
use crate::mode::ChatMode;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Streaming AI backend bound to one mode
#[async_trait]
pub trait AiAgent: Send + Sync {
    /// Send the conversation and obtain a response stream
    async fn send_history(
        &self,
        messages: &[Message],
        cancel: CancellationToken,
    ) -> Result<ResponseStream, AgentError>;

    /// Identifier of the backing model
    fn model_id(&self) -> &str;
}

/// Creates a fresh agent for each mode assignment
pub trait AgentFactory: Send + Sync {
    fn create(&self, mode: &ChatMode) -> Result<Arc<dyn AiAgent>, AgentError>;
}

/// Logging wrapper for agents
pub struct LoggingAgent {
    inner: Arc<dyn AiAgent>,
    model_id: String,
}

impl LoggingAgent {
    pub fn new(inner: Arc<dyn AiAgent>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl AiAgent for LoggingAgent {
    async fn send_history(
        &self,
        messages: &[Message],
        cancel: CancellationToken,
    ) -> Result<ResponseStream, AgentError> {
        let start = std::time::Instant::now();
        let result = self.inner.send_history(messages, cancel).await;
        let duration = start.elapsed();

        match &result {
            Ok(_) => {
                tracing::info!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    messages = messages.len(),
                    "Agent stream opened"
                );
            }
            Err(e) if e.is_cancelled() => {
                tracing::debug!(model = %self.model_id, "Agent request cancelled");
            }
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    transient = e.kind.is_transient(),
                    "Agent request failed"
                );
            }
        }

        result
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
