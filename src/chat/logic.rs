//! Chat business logic
//!
//! Owns the history, the current mode and its agent. Every method here runs
//! with the chat lock held; the machine decides when to call what.

use super::state::{ChatId, ResponseKind, Trigger};
use super::stream::{ResponseRun, StreamProgress};
use crate::agent::{AgentError, AgentFactory, AiAgent, ResponseStream};
use crate::config::ChatConfig;
use crate::error::ChatError;
use crate::history::{ChatHistory, Message};
use crate::mode::ChatMode;
use crate::sink::{MessageSink, Notice, Outgoing};
use crate::tools::FunctionRegistry;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// External collaborators of a chat
#[derive(Clone)]
pub struct ChatServices {
    pub agents: Arc<dyn AgentFactory>,
    pub functions: Arc<dyn FunctionRegistry>,
    pub sink: Arc<dyn MessageSink>,
    pub config: ChatConfig,
}

/// Outcome of an operation that may hand over a stream
#[derive(Debug)]
pub enum OperationResult {
    Success(ResponseStream),
    Failure(Trigger),
}

/// Agent and mode a response was requested from, with the messages it was
/// sent. Every tool round of that response stays on them, whatever mode the
/// chat switches to meanwhile.
#[derive(Clone)]
pub struct ResponseOrigin {
    agent: Arc<dyn AiAgent>,
    mode: ChatMode,
    messages: Vec<Message>,
}

impl ResponseOrigin {
    pub fn mode(&self) -> &ChatMode {
        &self.mode
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }
}

/// A prepared agent request, detached from the chat so it can run without
/// the lock
pub struct ResponseRequest {
    origin: ResponseOrigin,
}

impl ResponseRequest {
    pub fn messages(&self) -> &[Message] {
        self.origin.messages()
    }

    pub fn origin(&self) -> &ResponseOrigin {
        &self.origin
    }

    /// Send the request. Cancellation fails with `UserCancel`, any other
    /// failure with `AiResponseError`.
    pub async fn send(self, cancel: CancellationToken) -> OperationResult {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(AgentError::cancelled()),
            result = self.origin.agent.send_history(&self.origin.messages, cancel.clone()) => result,
        };

        match result {
            Ok(stream) => OperationResult::Success(stream),
            Err(e) if e.is_cancelled() => OperationResult::Failure(Trigger::UserCancel),
            Err(e) => OperationResult::Failure(Trigger::AiResponseError(e.to_string())),
        }
    }
}

pub struct ChatLogic {
    id: ChatId,
    history: ChatHistory,
    mode: ChatMode,
    agent: Option<Arc<dyn AiAgent>>,
    services: ChatServices,
}

impl ChatLogic {
    /// Logic without an agent; one is created when the mode is applied
    pub fn new(id: ChatId, mode: ChatMode, services: ChatServices) -> Self {
        Self {
            id,
            history: ChatHistory::new(),
            mode,
            agent: None,
            services,
        }
    }

    pub fn id(&self) -> &ChatId {
        &self.id
    }

    pub fn mode(&self) -> &ChatMode {
        &self.mode
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    pub fn has_agent(&self) -> bool {
        self.agent.is_some()
    }

    pub fn reset_history(&mut self) {
        self.history.clear();
    }

    /// Replace the mode and its agent. The old agent is dropped; on failure
    /// nothing changes.
    pub fn replace_mode(&mut self, mode: ChatMode) -> Result<(), ChatError> {
        let agent = self.services.agents.create(&mode)?;
        tracing::info!(
            chat_id = %self.id,
            mode = %mode.name,
            model = %agent.model_id(),
            "Mode applied"
        );
        self.agent = Some(agent);
        self.mode = mode;
        Ok(())
    }

    pub fn append_messages(&mut self, messages: Vec<Message>) {
        self.history.add_user_messages(messages, false);
    }

    /// Adjust the history for `kind` and snapshot the request
    pub fn prepare(&mut self, kind: ResponseKind) -> Result<ResponseRequest, ChatError> {
        if self.agent.is_none() {
            return Err(ChatError::NoAgent);
        }
        match kind {
            ResponseKind::Request => {}
            ResponseKind::Continue => {
                let instruction = Message::system(self.services.config.continue_prompt.clone());
                self.history.append_response(instruction)?;
            }
            ResponseKind::Regenerate => {
                let removed = self.history.remove_responses();
                tracing::debug!(chat_id = %self.id, removed, "Removed previous response");
            }
        }

        Ok(ResponseRequest {
            origin: self.origin()?,
        })
    }

    /// Current agent and mode with a snapshot of the request messages
    pub fn origin(&self) -> Result<ResponseOrigin, ChatError> {
        let agent = self.agent.clone().ok_or(ChatError::NoAgent)?;
        Ok(ResponseOrigin {
            agent,
            mode: self.mode.clone(),
            messages: self.request_messages(),
        })
    }

    /// Stream consumer for a response opened from `origin`, sharing
    /// `progress` with the caller
    pub(crate) fn response_run(
        &self,
        origin: ResponseOrigin,
        progress: Arc<Mutex<StreamProgress>>,
    ) -> ResponseRun {
        let ResponseOrigin {
            agent,
            mode,
            messages,
        } = origin;
        ResponseRun {
            chat_id: self.id.clone(),
            agent,
            context: messages,
            sender: mode.display_name,
            functions_enabled: mode.flags.functions,
            functions: Arc::clone(&self.services.functions),
            sink: Arc::clone(&self.services.sink),
            max_tool_depth: self.services.config.max_tool_depth,
            edit_interval: self.services.config.edit_interval,
            progress,
        }
    }

    /// Commit response messages to the last turn
    pub fn commit(&mut self, messages: Vec<Message>) -> Result<(), ChatError> {
        let count = messages.len();
        for message in messages {
            self.history.append_response(message)?;
        }
        tracing::debug!(chat_id = %self.id, count, "Response committed");
        Ok(())
    }

    pub async fn notify(&self, notice: Notice) -> Result<(), ChatError> {
        self.services.sink.notify(&self.id, notice).await?;
        Ok(())
    }

    pub async fn send(&self, outgoing: &Outgoing) -> Result<(), ChatError> {
        self.services.sink.send_or_edit(&self.id, outgoing).await?;
        Ok(())
    }

    /// System prompt followed by the whole history
    fn request_messages(&self) -> Vec<Message> {
        let prompt = (!self.mode.system_prompt.is_empty())
            .then(|| Message::system(self.mode.system_prompt.clone()));
        prompt
            .into_iter()
            .chain(self.history.messages().cloned())
            .collect()
    }
}
