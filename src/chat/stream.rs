//! Response stream consumption and the tool-call loop

use super::state::{ChatId, Trigger};
use crate::agent::{AgentError, AiAgent, ResponseStream};
use crate::history::{joined_text, tool_calls, ContentItem, ExternalId, Message, ToolCall};
use crate::sink::{MessageSink, Outgoing};
use crate::tools::{FunctionError, FunctionRegistry};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// What a running response has produced so far, shared with the machine so
/// a stop can keep it
#[derive(Debug, Default)]
pub(crate) struct StreamProgress {
    /// Finished rounds: assistant messages and tool results
    rounds: Vec<Message>,
    /// Text of the round being streamed
    partial: String,
    /// Front-end id of the live message of the current round
    live_id: Option<ExternalId>,
    sender: String,
}

impl StreamProgress {
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            ..Self::default()
        }
    }

    /// Take everything produced so far. The partial round becomes a
    /// truncated assistant message; the returned edit marks its live message
    /// complete.
    pub fn drain(&mut self) -> (Vec<Message>, Option<Outgoing>) {
        let mut messages = std::mem::take(&mut self.rounds);
        let partial = std::mem::take(&mut self.partial);
        let live_id = self.live_id.take();
        if partial.is_empty() {
            return (messages, None);
        }

        let mut message = Message::assistant(self.sender.clone(), vec![ContentItem::text(&partial)]);
        let final_edit = live_id.map(|id| {
            message.external_id = Some(id);
            Outgoing {
                replace: Some(id),
                text: partial,
                attachments: vec![],
                complete: true,
            }
        });
        messages.push(message);
        (messages, final_edit)
    }
}

fn lock(progress: &Mutex<StreamProgress>) -> MutexGuard<'_, StreamProgress> {
    progress.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Consumes one response, including every tool round it triggers
pub(crate) struct ResponseRun {
    pub chat_id: ChatId,
    pub agent: Arc<dyn AiAgent>,
    /// Messages the first request was sent with
    pub context: Vec<Message>,
    pub sender: String,
    pub functions_enabled: bool,
    pub functions: Arc<dyn FunctionRegistry>,
    pub sink: Arc<dyn MessageSink>,
    pub max_tool_depth: usize,
    pub edit_interval: Duration,
    pub progress: Arc<Mutex<StreamProgress>>,
}

impl ResponseRun {
    /// Drive the response to its end and return the trigger that settles it:
    /// `AiResponseFinished`, `AiResponseError`, or `UserStop` once `cancel`
    /// fires.
    pub async fn run(self, mut stream: ResponseStream, cancel: CancellationToken) -> Trigger {
        let mut depth = 0;
        loop {
            let content = match self.consume(stream, &cancel).await {
                Ok(content) => content,
                Err(trigger) => return trigger,
            };
            let calls = tool_calls(&content);

            if calls.is_empty() {
                return self.finish(content);
            }

            if depth >= self.max_tool_depth {
                tracing::warn!(
                    chat_id = %self.chat_id,
                    depth,
                    pending = calls.len(),
                    "Tool call depth exhausted, keeping partial answer"
                );
                let text_only = content
                    .into_iter()
                    .filter(|item| item.as_tool_use().is_none())
                    .collect();
                return self.finish(text_only);
            }

            let mut round = vec![self.assistant_message(content)];
            for call in &calls {
                match self.call_function(call, &cancel).await {
                    Some(result) => round.push(result),
                    None => return Trigger::UserStop,
                }
            }

            {
                let mut progress = lock(&self.progress);
                progress.rounds.extend(round);
                progress.partial.clear();
                progress.live_id = None;
            }
            depth += 1;

            stream = match self.reinvoke(&cancel).await {
                Ok(next) => next,
                Err(trigger) => return trigger,
            };
        }
    }

    /// Forward deltas to the sink and return the round's final content
    async fn consume(
        &self,
        mut stream: ResponseStream,
        cancel: &CancellationToken,
    ) -> Result<Vec<ContentItem>, Trigger> {
        let mut last_edit: Option<Instant> = None;

        loop {
            let delta = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Trigger::UserStop),
                delta = stream.next_delta() => delta,
            };

            match delta {
                None => break,
                Some(Err(e)) if e.is_cancelled() => return Err(Trigger::UserStop),
                Some(Err(e)) => {
                    tracing::warn!(chat_id = %self.chat_id, error = %e, "Response stream failed");
                    return Err(Trigger::AiResponseError(e.to_string()));
                }
                Some(Ok(delta)) => {
                    let text = {
                        let mut progress = lock(&self.progress);
                        progress.partial.push_str(&delta);
                        progress.partial.clone()
                    };
                    let due = match last_edit {
                        Some(at) => at.elapsed() >= self.edit_interval,
                        None => true,
                    };
                    if due {
                        self.publish(text, vec![], false, cancel).await?;
                        last_edit = Some(Instant::now());
                    }
                }
            }
        }

        let content = stream.into_content();
        let text = joined_text(&content);
        let attachments: Vec<_> = content
            .iter()
            .filter(|item| item.as_text().is_none() && item.as_tool_use().is_none())
            .cloned()
            .collect();
        if !text.is_empty() || !attachments.is_empty() {
            self.publish(text, attachments, true, cancel).await?;
        }
        Ok(content)
    }

    async fn publish(
        &self,
        text: String,
        attachments: Vec<ContentItem>,
        complete: bool,
        cancel: &CancellationToken,
    ) -> Result<(), Trigger> {
        let outgoing = Outgoing {
            replace: lock(&self.progress).live_id,
            text,
            attachments,
            complete,
        };

        let sent = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Trigger::UserStop),
            sent = self.sink.send_or_edit(&self.chat_id, &outgoing) => sent,
        };

        match sent {
            Ok(id) => {
                lock(&self.progress).live_id = Some(id);
                Ok(())
            }
            Err(e) => {
                tracing::error!(chat_id = %self.chat_id, error = %e, "Failed to deliver response");
                Err(Trigger::AiResponseError(e.to_string()))
            }
        }
    }

    /// Run one function call. Failures become an error result the agent can
    /// read; `None` means the response was cancelled.
    async fn call_function(&self, call: &ToolCall, cancel: &CancellationToken) -> Option<Message> {
        let result = if self.functions_enabled {
            let arguments = call.arguments.to_string();
            tokio::select! {
                biased;
                () = cancel.cancelled() => return None,
                result = self.functions.execute(&call.name, &arguments, &self.chat_id, cancel.child_token()) => result,
            }
        } else {
            Err(FunctionError::Disabled)
        };

        match result {
            Ok(result) => Some(Message::tool_result(call, result.content)),
            Err(FunctionError::Cancelled) if cancel.is_cancelled() => None,
            Err(e) => {
                tracing::warn!(
                    chat_id = %self.chat_id,
                    function = %call.name,
                    error = %e,
                    "Function call failed"
                );
                Some(Message::tool_result(
                    call,
                    vec![ContentItem::text(format!("Error: {e}"))],
                ))
            }
        }
    }

    /// Ask the agent again with the tool rounds appended
    async fn reinvoke(&self, cancel: &CancellationToken) -> Result<ResponseStream, Trigger> {
        let messages: Vec<Message> = {
            let progress = lock(&self.progress);
            self.context
                .iter()
                .chain(progress.rounds.iter())
                .cloned()
                .collect()
        };

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(AgentError::cancelled()),
            result = self.agent.send_history(&messages, cancel.clone()) => result,
        };
        result.map_err(|e| {
            if e.is_cancelled() {
                Trigger::UserStop
            } else {
                Trigger::AiResponseError(e.to_string())
            }
        })
    }

    fn assistant_message(&self, content: Vec<ContentItem>) -> Message {
        let mut message = Message::assistant(self.sender.clone(), content);
        message.external_id = lock(&self.progress).live_id;
        message
    }

    /// Record the last round and report every message of the response. The
    /// progress keeps them until the machine accepts the result.
    fn finish(&self, content: Vec<ContentItem>) -> Trigger {
        let message = (!content.is_empty()).then(|| self.assistant_message(content));
        let mut progress = lock(&self.progress);
        progress.partial.clear();
        progress.live_id = None;
        progress.rounds.extend(message);
        Trigger::AiResponseFinished(progress.rounds.clone())
    }
}
