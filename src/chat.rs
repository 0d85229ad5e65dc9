//! Per-chat orchestration
//!
//! `Chat` is the handle the messaging layer talks to. Each call becomes a
//! trigger on the chat's state machine and returns the state the chat
//! settled in, or the reason the call was not performed.

mod effect;
mod logic;
mod machine;
#[cfg(test)]
mod proptests;
mod state;
mod stream;
mod transition;

pub use effect::Effect;
pub use logic::{ChatLogic, ChatServices, OperationResult, ResponseOrigin, ResponseRequest};
pub use machine::ChatStateMachine;
pub use state::{ChatId, ChatState, ResponseKind, Trigger, TriggerKind};
pub use transition::{transition, TransitionContext, TransitionError, TransitionResult};

use crate::error::ChatError;
use crate::history::{ChatHistory, Message};
use crate::mode::ChatMode;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;

/// Public handle of one conversation
pub struct Chat {
    machine: Arc<ChatStateMachine>,
}

impl Chat {
    /// Create a chat and apply its initial mode. Fails when no agent could be
    /// created for `mode`.
    pub async fn new(id: ChatId, mode: ChatMode, services: ChatServices) -> Result<Self, ChatError> {
        let name = mode.name.clone();
        let logic = ChatLogic::new(id, mode.clone(), services);
        let machine = ChatStateMachine::new(logic);

        machine.fire(Trigger::UserSetMode(mode)).await?;
        if !machine.has_agent().await {
            return Err(ChatError::ModeNotApplied(name));
        }

        tracing::info!(chat_id = %machine.id(), mode = %name, "Chat created");
        Ok(Self { machine })
    }

    pub fn id(&self) -> &ChatId {
        self.machine.id()
    }

    pub fn current_mode(&self) -> ChatMode {
        self.machine.mode()
    }

    pub fn state(&self) -> ChatState {
        self.machine.state()
    }

    pub async fn reset(&self) -> Result<ChatState, TransitionError> {
        self.machine.fire(Trigger::UserReset).await
    }

    pub async fn set_mode(&self, mode: ChatMode) -> Result<ChatState, TransitionError> {
        self.machine.fire(Trigger::UserSetMode(mode)).await
    }

    pub async fn add_messages(&self, messages: Vec<Message>) -> Result<ChatState, TransitionError> {
        self.machine.fire(Trigger::UserAddMessages(messages)).await
    }

    /// Ask for a response. Returns once the request is under way; the
    /// response itself streams in the background.
    pub async fn request_response(
        &self,
        cancel: CancellationToken,
    ) -> Result<ChatState, TransitionError> {
        self.machine.fire(Trigger::UserRequestResponse(cancel)).await
    }

    pub async fn continue_response(
        &self,
        cancel: CancellationToken,
    ) -> Result<ChatState, TransitionError> {
        self.machine.fire(Trigger::UserContinue(cancel)).await
    }

    pub async fn regenerate_response(
        &self,
        cancel: CancellationToken,
    ) -> Result<ChatState, TransitionError> {
        self.machine.fire(Trigger::UserRegenerate(cancel)).await
    }

    /// Stop the response, keeping what was produced
    pub async fn stop(&self) -> Result<ChatState, TransitionError> {
        self.machine.fire(Trigger::UserStop).await
    }

    pub async fn cancel(&self) -> Result<ChatState, TransitionError> {
        self.machine.fire(Trigger::UserCancel).await
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.machine.subscribe()
    }

    pub fn subscribe_mode(&self) -> watch::Receiver<ChatMode> {
        self.machine.subscribe_mode()
    }

    pub fn state_changes(&self) -> WatchStream<ChatState> {
        self.machine.state_changes()
    }

    /// Wait for any response in progress to end
    pub async fn settled(&self) -> ChatState {
        self.machine.settled().await
    }

    pub async fn history(&self) -> ChatHistory {
        self.machine.history().await
    }
}
