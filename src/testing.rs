//! Mock collaborators for testing
//!
//! Scripted agents, a recording sink and canned functions, so chats can be
//! driven end to end without any I/O.

use crate::agent::{AgentError, AgentFactory, AiAgent, ResponseStream, StreamChunk};
use crate::chat::{Chat, ChatId, ChatServices, ChatState};
use crate::config::ChatConfig;
use crate::history::{joined_text, ContentItem, ExternalId, Message, ToolCall};
use crate::mode::ChatMode;
use crate::sink::{MessageSink, Notice, Outgoing, SinkError};
use crate::tools::{FunctionDefinition, FunctionError, FunctionRegistry, FunctionResult};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Scripted agent
// ============================================================================

enum Step {
    Delta(String),
    Content(Vec<ContentItem>),
    Fail(AgentError),
    /// Stop producing without ending the stream
    Hang,
}

/// What the agent does for one request
pub struct Script {
    reject: Option<AgentError>,
    hang_before_stream: bool,
    gate: Option<Arc<Notify>>,
    steps: Vec<Step>,
}

impl Script {
    fn new(steps: Vec<Step>) -> Self {
        Self {
            reject: None,
            hang_before_stream: false,
            gate: None,
            steps,
        }
    }

    /// Plain text in the given deltas
    pub fn text<I, S>(deltas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(deltas.into_iter().map(|d| Step::Delta(d.into())).collect())
    }

    /// Structured content, its text streamed first
    pub fn content(items: Vec<ContentItem>) -> Self {
        let text = joined_text(&items);
        let mut steps = vec![];
        if !text.is_empty() {
            steps.push(Step::Delta(text));
        }
        steps.push(Step::Content(items));
        Self::new(steps)
    }

    /// Optional text followed by function call requests
    pub fn tool_calls(text: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        let text = text.into();
        let mut items = vec![];
        if !text.is_empty() {
            items.push(ContentItem::text(text));
        }
        items.extend(calls.into_iter().map(ContentItem::ToolUse));
        Self::content(items)
    }

    /// Fail before any stream is produced
    pub fn reject(error: AgentError) -> Self {
        Self {
            reject: Some(error),
            ..Self::new(vec![])
        }
    }

    /// Never produce a stream; only cancellation ends the request
    pub fn hang_before_stream() -> Self {
        Self {
            hang_before_stream: true,
            ..Self::new(vec![])
        }
    }

    /// Hand out the stream only once `gate` is notified
    pub fn held_until(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn then_hang(mut self) -> Self {
        self.steps.push(Step::Hang);
        self
    }

    pub fn then_fail(mut self, error: AgentError) -> Self {
        self.steps.push(Step::Fail(error));
        self
    }
}

#[derive(Default)]
struct Shared {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<Vec<Message>>>,
    created: AtomicUsize,
    parked: Notify,
}

/// Factory whose agents all play from one queue of scripts
#[derive(Clone, Default)]
pub struct ScriptedAgentFactory {
    shared: Arc<Shared>,
    failing: Vec<String>,
}

impl ScriptedAgentFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse to create agents for the named mode
    pub fn failing_for(mut self, mode: impl Into<String>) -> Self {
        self.failing.push(mode.into());
        self
    }

    pub fn push(&self, script: Script) {
        self.shared.scripts.lock().unwrap().push_back(script);
    }

    /// Message lists of every request, in order
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.shared.requests.lock().unwrap().clone()
    }

    /// Number of agents created
    pub fn created(&self) -> usize {
        self.shared.created.load(Ordering::SeqCst)
    }

    /// Wait until a stream reached a `Hang` step
    pub async fn wait_until_parked(&self) {
        tokio::time::timeout(WAIT, self.shared.parked.notified())
            .await
            .expect("stream never parked");
    }
}

impl AgentFactory for ScriptedAgentFactory {
    fn create(&self, mode: &ChatMode) -> Result<Arc<dyn AiAgent>, AgentError> {
        if self.failing.contains(&mode.name) {
            return Err(AgentError::auth(format!("no credentials for {}", mode.name)));
        }
        self.shared.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedAgent {
            shared: Arc::clone(&self.shared),
            model_id: format!("scripted-{}", mode.name),
        }))
    }
}

struct ScriptedAgent {
    shared: Arc<Shared>,
    model_id: String,
}

#[async_trait]
impl AiAgent for ScriptedAgent {
    async fn send_history(
        &self,
        messages: &[Message],
        cancel: CancellationToken,
    ) -> Result<ResponseStream, AgentError> {
        self.shared.requests.lock().unwrap().push(messages.to_vec());
        let script = self
            .shared
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AgentError::unknown("no script queued"))?;

        if let Some(error) = script.reject {
            return Err(error);
        }
        if script.hang_before_stream {
            cancel.cancelled().await;
            return Err(AgentError::cancelled());
        }
        if let Some(gate) = script.gate {
            tokio::select! {
                () = cancel.cancelled() => return Err(AgentError::cancelled()),
                () = gate.notified() => {}
            }
        }

        let shared = Arc::clone(&self.shared);
        let chunks = futures::stream::iter(script.steps).then(move |step| {
            let shared = Arc::clone(&shared);
            async move {
                match step {
                    Step::Delta(text) => Ok(StreamChunk::Text(text)),
                    Step::Content(items) => Ok(StreamChunk::Content(items)),
                    Step::Fail(error) => Err(error),
                    Step::Hang => {
                        shared.parked.notify_one();
                        futures::future::pending().await
                    }
                }
            }
        });
        Ok(ResponseStream::new(chunks))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ============================================================================
// Recording sink
// ============================================================================

/// Sink that records everything and hands out increasing ids
#[derive(Default)]
pub struct RecordingSink {
    outgoing: Mutex<Vec<Outgoing>>,
    notices: Mutex<Vec<Notice>>,
    next_id: AtomicI64,
    fail_sends: AtomicBool,
    fail_notices: AtomicBool,
}

impl RecordingSink {
    pub fn outgoing(&self) -> Vec<Outgoing> {
        self.outgoing.lock().unwrap().clone()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    pub fn fail_notices(&self) {
        self.fail_notices.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn send_or_edit(
        &self,
        _chat_id: &ChatId,
        outgoing: &Outgoing,
    ) -> Result<ExternalId, SinkError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(SinkError("front-end unavailable".into()));
        }
        self.outgoing.lock().unwrap().push(outgoing.clone());
        Ok(outgoing
            .replace
            .unwrap_or_else(|| ExternalId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)))
    }

    async fn notify(&self, _chat_id: &ChatId, notice: Notice) -> Result<(), SinkError> {
        if self.fail_notices.load(Ordering::SeqCst) {
            return Err(SinkError("notices unavailable".into()));
        }
        self.notices.lock().unwrap().push(notice);
        Ok(())
    }
}

// ============================================================================
// Mock functions
// ============================================================================

/// Functions answering with canned text, recording their calls
#[derive(Clone, Default)]
pub struct MockFunctions {
    responses: Arc<Mutex<HashMap<String, String>>>,
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(name.into(), text.into());
        self
    }

    /// `(name, arguments)` of every call
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FunctionRegistry for MockFunctions {
    async fn execute(
        &self,
        name: &str,
        arguments: &str,
        _caller: &ChatId,
        _cancel: CancellationToken,
    ) -> Result<FunctionResult, FunctionError> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments.to_string()));
        self.responses
            .lock()
            .unwrap()
            .get(name)
            .map(FunctionResult::text)
            .ok_or_else(|| FunctionError::Unknown(name.to_string()))
    }

    fn definitions(&self) -> Vec<FunctionDefinition> {
        vec![]
    }
}

// ============================================================================
// Wiring helpers
// ============================================================================

pub fn services(factory: ScriptedAgentFactory) -> (ChatServices, Arc<RecordingSink>) {
    services_with(factory, MockFunctions::new())
}

pub fn services_with(
    factory: ScriptedAgentFactory,
    functions: MockFunctions,
) -> (ChatServices, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let services = ChatServices {
        agents: Arc::new(factory),
        functions: Arc::new(functions),
        sink: Arc::clone(&sink) as Arc<dyn MessageSink>,
        config: ChatConfig::default(),
    };
    (services, sink)
}

/// Wait until the chat reports `expected`
pub async fn wait_for_state(chat: &Chat, expected: ChatState) {
    let mut rx = chat.subscribe();
    tokio::time::timeout(WAIT, rx.wait_for(|state| *state == expected))
        .await
        .unwrap_or_else(|_| panic!("chat never reached {expected}"))
        .expect("state channel closed");
}
