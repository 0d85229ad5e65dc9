//! Pure state transition function
//!
//! Given a state and a trigger, decide the next state and the effects to run.
//! No I/O happens here; the machine executes the effects.

use super::effect::Effect;
use super::state::{ChatState, ResponseKind, Trigger, TriggerKind};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ChatState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ChatState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    #[must_use]
    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    #[must_use]
    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Why a trigger was not fired
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("{trigger} is not permitted in state {state}")]
    NotPermitted {
        state: ChatState,
        trigger: TriggerKind,
    },
    #[error("no messages to add")]
    NothingToAdd,
    #[error("history is empty, nothing to respond to")]
    EmptyHistory,
    #[error("{trigger} came from an abandoned operation")]
    Stale { trigger: TriggerKind },
}

/// Facts about the chat that guards depend on
#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionContext {
    pub history_empty: bool,
}

/// Pure transition function
pub fn transition(
    state: ChatState,
    context: TransitionContext,
    trigger: Trigger,
) -> Result<TransitionResult, TransitionError> {
    use ChatState::{
        Error, InitiateAiResponse, Streaming, WaitingForFirstMessage, WaitingForNewMessages,
    };

    match (state, trigger) {
        // Adding nothing is a no-op everywhere
        (_, Trigger::UserAddMessages(messages)) if messages.is_empty() => {
            Err(TransitionError::NothingToAdd)
        }

        // ============================================================
        // Reset (any state)
        // ============================================================
        (from, Trigger::UserReset) => {
            let mut result = TransitionResult::new(WaitingForFirstMessage);
            if from.is_busy() {
                result = result.with_effect(Effect::AbandonResponse);
            }
            result = result.with_effect(Effect::ResetHistory);
            if from == Error {
                result = result.with_effect(Effect::ClearErrorNotice);
            }
            Ok(result.with_effect(Effect::RunResetHook))
        }

        // ============================================================
        // Mode changes
        // ============================================================
        (
            same @ (WaitingForFirstMessage | WaitingForNewMessages | InitiateAiResponse | Error),
            Trigger::UserSetMode(mode),
        ) => Ok(TransitionResult::new(same).with_effect(Effect::ReplaceMode(mode))),

        // Mid-stream mode change: drop the stream, ask again under the new mode
        (Streaming, Trigger::UserSetMode(mode)) => {
            Ok(TransitionResult::new(InitiateAiResponse).with_effect(Effect::RestartResponse(mode)))
        }

        // ============================================================
        // User messages
        // ============================================================
        (WaitingForFirstMessage | WaitingForNewMessages, Trigger::UserAddMessages(messages)) => {
            Ok(TransitionResult::new(WaitingForNewMessages)
                .with_effect(Effect::AppendMessages(messages)))
        }

        // New messages abandon the response in flight
        (InitiateAiResponse | Streaming, Trigger::UserAddMessages(messages)) => {
            Ok(TransitionResult::new(WaitingForNewMessages).with_effects([
                Effect::AbandonResponse,
                Effect::AppendMessages(messages),
            ]))
        }

        (Error, Trigger::UserAddMessages(messages)) => {
            Ok(TransitionResult::new(WaitingForNewMessages).with_effects([
                Effect::AppendMessages(messages),
                Effect::ClearErrorNotice,
            ]))
        }

        // ============================================================
        // Response requests
        // ============================================================
        (
            WaitingForNewMessages | Error,
            Trigger::UserRequestResponse(_) | Trigger::UserContinue(_) | Trigger::UserRegenerate(_),
        ) if context.history_empty => Err(TransitionError::EmptyHistory),

        (WaitingForNewMessages, Trigger::UserRequestResponse(cancel)) => {
            Ok(start_response(ResponseKind::Request, cancel))
        }

        (WaitingForNewMessages, Trigger::UserContinue(cancel)) => {
            Ok(start_response(ResponseKind::Continue, cancel))
        }

        (WaitingForNewMessages, Trigger::UserRegenerate(cancel)) => {
            Ok(start_response(ResponseKind::Regenerate, cancel))
        }

        (Error, Trigger::UserRegenerate(cancel)) => Ok(TransitionResult::new(InitiateAiResponse)
            .with_effect(Effect::StartResponse {
                kind: ResponseKind::Regenerate,
                cancel,
            })
            .with_effect(Effect::ClearErrorNotice)),

        // ============================================================
        // Agent progress
        // ============================================================

        // Also taken from Streaming: a new stream replaces the current one
        (InitiateAiResponse | Streaming, Trigger::AiProducedContent(stream, cancel)) => {
            Ok(TransitionResult::new(Streaming)
                .with_effect(Effect::ConsumeStream { stream, cancel }))
        }

        (Streaming, Trigger::AiResponseFinished(messages)) => {
            Ok(TransitionResult::new(WaitingForNewMessages)
                .with_effect(Effect::CommitResponse(messages)))
        }

        (InitiateAiResponse | Streaming, Trigger::AiResponseError(message)) => {
            Ok(TransitionResult::new(Error).with_effects([
                Effect::AbandonResponse,
                Effect::ShowErrorNotice(message),
            ]))
        }

        // ============================================================
        // Cancellation
        // ============================================================

        // Nothing was produced yet
        (InitiateAiResponse, Trigger::UserCancel | Trigger::UserStop) => {
            Ok(TransitionResult::new(WaitingForNewMessages).with_effect(Effect::AbandonResponse))
        }

        // Keep the partial answer
        (Streaming, Trigger::UserStop | Trigger::UserCancel) => {
            Ok(TransitionResult::new(WaitingForNewMessages).with_effect(Effect::StopResponse))
        }

        // ============================================================
        // Everything else is rejected
        // ============================================================
        (state, trigger) => Err(TransitionError::NotPermitted {
            state,
            trigger: trigger.kind(),
        }),
    }
}

fn start_response(kind: ResponseKind, cancel: CancellationToken) -> TransitionResult {
    TransitionResult::new(ChatState::InitiateAiResponse)
        .with_effect(Effect::StartResponse { kind, cancel })
}
