//! Functions the agent can call mid-response

mod clock;

pub use clock::ClockTool;

use crate::chat::ChatId;
use crate::history::{joined_text, ContentItem};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Content produced by a function, folded back into the history
#[derive(Debug, Clone, Default)]
pub struct FunctionResult {
    pub content: Vec<ContentItem>,
}

impl FunctionResult {
    pub fn new(content: Vec<ContentItem>) -> Self {
        Self { content }
    }

    pub fn text(s: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::text(s)],
        }
    }

    /// Concatenated text content
    pub fn text_content(&self) -> String {
        joined_text(&self.content)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FunctionError {
    #[error("unknown function: {0}")]
    Unknown(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("function failed: {0}")]
    Failed(String),
    #[error("function calls are disabled in this mode")]
    Disabled,
    #[error("function call cancelled")]
    Cancelled,
}

/// Description of a callable function, for agents that advertise them
#[derive(Debug, Clone)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Executes function calls requested by the agent
#[async_trait]
pub trait FunctionRegistry: Send + Sync {
    async fn execute(
        &self,
        name: &str,
        arguments: &str,
        caller: &ChatId,
        cancel: CancellationToken,
    ) -> Result<FunctionResult, FunctionError>;

    fn definitions(&self) -> Vec<FunctionDefinition>;
}

/// Context for one tool invocation
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Cancellation signal for long-running work
    pub cancel: CancellationToken,
    /// The chat the call was made from
    pub chat_id: ChatId,
}

impl ToolContext {
    pub fn new(cancel: CancellationToken, chat_id: ChatId) -> Self {
        Self { cancel, chat_id }
    }
}

/// A single callable function
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> String;

    fn input_schema(&self) -> Value;

    async fn run(&self, input: Value, ctx: ToolContext) -> Result<FunctionResult, FunctionError>;
}

/// Registry backed by a list of tools
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in tools
    pub fn standard() -> Self {
        Self::new().with_tool(ClockTool)
    }

    #[must_use]
    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }
}

#[async_trait]
impl FunctionRegistry for ToolRegistry {
    async fn execute(
        &self,
        name: &str,
        arguments: &str,
        caller: &ChatId,
        cancel: CancellationToken,
    ) -> Result<FunctionResult, FunctionError> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| FunctionError::Unknown(name.to_string()))?;

        let input: Value = if arguments.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(arguments)
                .map_err(|e| FunctionError::InvalidArguments(e.to_string()))?
        };

        tracing::info!(chat_id = %caller, function = %name, "Executing function");
        let ctx = ToolContext::new(cancel.clone(), caller.clone());
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(FunctionError::Cancelled),
            result = tool.run(input, ctx) => result,
        }
    }

    fn definitions(&self) -> Vec<FunctionDefinition> {
        self.tools
            .iter()
            .map(|t| FunctionDefinition {
                name: t.name().to_string(),
                description: t.description(),
                input_schema: t.input_schema(),
            })
            .collect()
    }
}
