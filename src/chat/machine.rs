//! Per-chat state machine runtime
//!
//! All triggers go through one async mutex. A fired trigger is transitioned,
//! its effects executed, and any follow-up triggers they raise are drained
//! before the lock is released. Agent calls and stream consumption run as
//! background tasks; their results come back as triggers stamped with the
//! generation of the operation that produced them, and a stamp that no
//! longer matches the operation in flight is discarded.

use super::effect::Effect;
use super::logic::{ChatLogic, OperationResult, ResponseOrigin};
use super::state::{ChatId, ChatState, ResponseKind, Trigger};
use super::stream::StreamProgress;
use super::transition::{transition, TransitionContext, TransitionError};
use crate::error::ChatError;
use crate::history::ChatHistory;
use crate::mode::ChatMode;
use crate::sink::Notice;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use tokio::sync::{watch, Mutex};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;

/// Where a trigger came from
#[derive(Debug, Clone, Copy)]
enum Origin {
    External,
    /// Completion of the background operation with this generation
    Operation(u64),
}

/// The background operation currently allowed to report back
struct InFlight {
    generation: u64,
    /// Token the user passed with the request
    caller: CancellationToken,
    /// Child of `caller`, cancelled when the operation is abandoned
    token: CancellationToken,
    /// Present once a stream is being consumed
    progress: Option<Arc<StdMutex<StreamProgress>>>,
    /// Agent and mode the response was requested from
    origin: ResponseOrigin,
}

struct Inner {
    state: ChatState,
    logic: ChatLogic,
    generation: u64,
    in_flight: Option<InFlight>,
}

pub struct ChatStateMachine {
    id: ChatId,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ChatState>,
    mode_tx: watch::Sender<ChatMode>,
    this: Weak<Self>,
}

impl ChatStateMachine {
    pub fn new(logic: ChatLogic) -> Arc<Self> {
        let id = logic.id().clone();
        let (state_tx, _) = watch::channel(ChatState::default());
        let (mode_tx, _) = watch::channel(logic.mode().clone());
        Arc::new_cyclic(|this| Self {
            id,
            inner: Mutex::new(Inner {
                state: ChatState::default(),
                logic,
                generation: 0,
                in_flight: None,
            }),
            state_tx,
            mode_tx,
            this: this.clone(),
        })
    }

    pub fn id(&self) -> &ChatId {
        &self.id
    }

    /// State after the last completed transition
    pub fn state(&self) -> ChatState {
        *self.state_tx.borrow()
    }

    pub fn mode(&self) -> ChatMode {
        self.mode_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.state_tx.subscribe()
    }

    pub fn subscribe_mode(&self) -> watch::Receiver<ChatMode> {
        self.mode_tx.subscribe()
    }

    /// Every state the chat settles in, starting with the current one
    pub fn state_changes(&self) -> WatchStream<ChatState> {
        WatchStream::new(self.state_tx.subscribe())
    }

    /// Wait until no response is being produced
    pub async fn settled(&self) -> ChatState {
        let mut rx = self.state_tx.subscribe();
        let settled = rx.wait_for(|state| !state.is_busy()).await.map(|state| *state);
        settled.unwrap_or_else(|_| self.state())
    }

    /// Snapshot of the history, taken under the chat lock
    pub async fn history(&self) -> ChatHistory {
        self.inner.lock().await.logic.history().clone()
    }

    pub async fn has_agent(&self) -> bool {
        self.inner.lock().await.logic.has_agent()
    }

    /// Fire a trigger and return the state once it and all its follow-ups
    /// have been processed
    pub async fn fire(&self, trigger: Trigger) -> Result<ChatState, TransitionError> {
        self.dispatch(Origin::External, trigger).await
    }

    async fn dispatch(&self, origin: Origin, trigger: Trigger) -> Result<ChatState, TransitionError> {
        let mut inner = self.inner.lock().await;

        if let Origin::Operation(generation) = origin {
            let current = inner.in_flight.as_ref().map(|f| f.generation);
            if current != Some(generation) {
                tracing::debug!(
                    chat_id = %self.id,
                    generation,
                    trigger = %trigger.kind(),
                    "Discarding result of abandoned operation"
                );
                return Err(TransitionError::Stale {
                    trigger: trigger.kind(),
                });
            }
        }

        let mut follow_ups = VecDeque::new();
        if let Err(e) = self.step(&mut inner, trigger, &mut follow_ups).await {
            tracing::debug!(chat_id = %self.id, state = %inner.state, error = %e, "Trigger rejected");
            return Err(e);
        }

        while let Some(next) = follow_ups.pop_front() {
            let kind = next.kind();
            if let Err(e) = self.step(&mut inner, next, &mut follow_ups).await {
                tracing::warn!(
                    chat_id = %self.id,
                    state = %inner.state,
                    trigger = %kind,
                    error = %e,
                    "Dropping follow-up trigger"
                );
            }
        }

        Ok(inner.state)
    }

    /// One transition plus its effects. A failing effect skips the rest and
    /// queues an `AiResponseError`, unless it was a cancellation.
    async fn step(
        &self,
        inner: &mut Inner,
        trigger: Trigger,
        follow_ups: &mut VecDeque<Trigger>,
    ) -> Result<(), TransitionError> {
        let from = inner.state;
        let kind = trigger.kind();
        let context = TransitionContext {
            history_empty: inner.logic.history().is_empty(),
        };
        let result = transition(from, context, trigger)?;

        tracing::info!(
            chat_id = %self.id,
            from = %from,
            to = %result.new_state,
            trigger = %kind,
            "Chat transition"
        );
        inner.state = result.new_state;

        for effect in result.effects {
            if let Err(e) = self.execute(inner, effect).await {
                if e.is_cancelled() {
                    tracing::debug!(chat_id = %self.id, "Handler cancelled");
                } else {
                    tracing::error!(chat_id = %self.id, error = %e, "Handler failed");
                    follow_ups.push_back(Trigger::AiResponseError(e.to_string()));
                }
                break;
            }
        }

        self.state_tx.send_replace(inner.state);
        Ok(())
    }

    async fn execute(&self, inner: &mut Inner, effect: Effect) -> Result<(), ChatError> {
        match effect {
            Effect::ResetHistory => inner.logic.reset_history(),

            Effect::RunResetHook => self.notify(inner, Notice::Reset).await,

            Effect::ReplaceMode(mode) => self.replace_mode(inner, mode)?,

            Effect::AppendMessages(messages) => inner.logic.append_messages(messages),

            Effect::AbandonResponse => Self::abandon(inner),

            Effect::StartResponse { kind, cancel } => self.start_response(inner, kind, cancel)?,

            Effect::RestartResponse(mode) => {
                let caller = inner
                    .in_flight
                    .as_ref()
                    .map(|f| f.caller.clone())
                    .unwrap_or_default();
                Self::abandon(inner);
                self.replace_mode(inner, mode)?;
                self.start_response(inner, ResponseKind::Request, caller)?;
            }

            Effect::ConsumeStream { stream, cancel } => {
                let origin = match &inner.in_flight {
                    Some(flight) => flight.origin.clone(),
                    None => inner.logic.origin()?,
                };
                let progress = Arc::new(StdMutex::new(StreamProgress::new(
                    origin.mode().display_name.clone(),
                )));
                let run = inner
                    .logic
                    .response_run(origin.clone(), Arc::clone(&progress));

                // The stream is bound to the token of the request that opened it
                let token = match inner.in_flight.take() {
                    Some(flight) if flight.progress.is_none() => flight.token,
                    Some(flight) => {
                        flight.token.cancel();
                        cancel.child_token()
                    }
                    None => cancel.child_token(),
                };
                let generation = Self::begin(inner, cancel, token.clone(), Some(progress), origin);

                let machine = self.this.clone();
                tokio::spawn(async move {
                    let trigger = run.run(stream, token).await;
                    deliver(machine, generation, trigger).await;
                });
            }

            Effect::StopResponse => {
                let Some(flight) = inner.in_flight.take() else {
                    return Ok(());
                };
                flight.token.cancel();
                let Some(progress) = flight.progress else {
                    return Ok(());
                };
                let (messages, final_edit) = progress
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .drain();
                tracing::info!(chat_id = %self.id, kept = messages.len(), "Response stopped");
                inner.logic.commit(messages)?;
                if let Some(edit) = final_edit {
                    inner.logic.send(&edit).await?;
                }
            }

            Effect::CommitResponse(messages) => {
                inner.in_flight = None;
                inner.logic.commit(messages)?;
            }

            Effect::ShowErrorNotice(text) => self.notify(inner, Notice::Error(text)).await,

            Effect::ClearErrorNotice => self.notify(inner, Notice::ErrorCleared).await,
        }
        Ok(())
    }

    /// Notices never fail a transition; the state they describe is already
    /// in place.
    async fn notify(&self, inner: &Inner, notice: Notice) {
        let kind = notice.kind();
        if let Err(e) = inner.logic.notify(notice).await {
            tracing::warn!(chat_id = %self.id, notice = kind, error = %e, "Notice not delivered");
        }
    }

    fn replace_mode(&self, inner: &mut Inner, mode: ChatMode) -> Result<(), ChatError> {
        inner.logic.replace_mode(mode)?;
        self.mode_tx.send_replace(inner.logic.mode().clone());
        Ok(())
    }

    fn start_response(
        &self,
        inner: &mut Inner,
        kind: ResponseKind,
        caller: CancellationToken,
    ) -> Result<(), ChatError> {
        let request = inner.logic.prepare(kind)?;
        let token = caller.child_token();
        let origin = request.origin().clone();
        let generation = Self::begin(inner, caller.clone(), token.clone(), None, origin);

        tracing::debug!(chat_id = %self.id, ?kind, generation, "Requesting response");
        let machine = self.this.clone();
        tokio::spawn(async move {
            let trigger = match request.send(token).await {
                OperationResult::Success(stream) => Trigger::AiProducedContent(stream, caller),
                OperationResult::Failure(trigger) => trigger,
            };
            deliver(machine, generation, trigger).await;
        });
        Ok(())
    }

    /// Register a new operation as the one in flight
    fn begin(
        inner: &mut Inner,
        caller: CancellationToken,
        token: CancellationToken,
        progress: Option<Arc<StdMutex<StreamProgress>>>,
        origin: ResponseOrigin,
    ) -> u64 {
        inner.generation += 1;
        inner.in_flight = Some(InFlight {
            generation: inner.generation,
            caller,
            token,
            progress,
            origin,
        });
        inner.generation
    }

    fn abandon(inner: &mut Inner) {
        if let Some(flight) = inner.in_flight.take() {
            tracing::debug!(generation = flight.generation, "Abandoning response");
            flight.token.cancel();
        }
    }
}

impl Drop for ChatStateMachine {
    fn drop(&mut self) {
        if let Some(flight) = self.inner.get_mut().in_flight.take() {
            flight.token.cancel();
        }
    }
}

/// Report an operation's result back to its machine, if it is still alive
fn deliver(
    machine: Weak<ChatStateMachine>,
    generation: u64,
    trigger: Trigger,
) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let Some(machine) = machine.upgrade() else {
            return;
        };
        // Rejections are logged by the machine
        let _ = machine.dispatch(Origin::Operation(generation), trigger).await;
    })
}
