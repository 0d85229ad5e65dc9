//! Terminal front-end for the chat core
//!
//! Lines typed on stdin are added to one chat and answered by a local echo
//! agent. Commands: `/reset`, `/continue`, `/regen`, `/stop`, `/mode <name>`,
//! `/quit`. Logs go to stderr as JSON.

use async_trait::async_trait;
use chat_core::agent::{AgentError, AgentFactory, AiAgent, LoggingAgent, ResponseStream, StreamChunk};
use chat_core::history::{ContentItem, ExternalId, Message, Role, ToolCall};
use chat_core::{
    ChatConfig, ChatId, ChatMode, ChatRegistry, ChatServices, DirectoryModeSource, MessageSink,
    ModeFlags, ModeSource, Notice, Outgoing, SinkError, StaticModeSource, ToolRegistry,
};
use serde_json::json;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Answers by echoing the last user message word by word. Asks for the
/// clock when the user mentions the time.
struct EchoAgent {
    model_id: String,
    functions: bool,
}

#[async_trait]
impl AiAgent for EchoAgent {
    async fn send_history(
        &self,
        messages: &[Message],
        _cancel: CancellationToken,
    ) -> Result<ResponseStream, AgentError> {
        let last = messages
            .last()
            .ok_or_else(|| AgentError::invalid_request("empty conversation"))?;

        if last.role == Role::Tool {
            let text = format!("The clock says {}.", last.text());
            return Ok(ResponseStream::from_chunks(vec![Ok(StreamChunk::Text(text))]));
        }

        let prompt = messages
            .iter()
            .rev()
            .find(|m| m.is_user())
            .map(Message::text)
            .unwrap_or_default();

        if self.functions && prompt.to_lowercase().contains("time") {
            let call = ToolCall::new(format!("call-{}", uuid::Uuid::new_v4()), "current_time", json!({}));
            return Ok(ResponseStream::from_chunks(vec![
                Ok(StreamChunk::Text("Let me check.".into())),
                Ok(StreamChunk::Content(vec![
                    ContentItem::text("Let me check."),
                    ContentItem::ToolUse(call),
                ])),
            ]));
        }

        let words: Vec<String> = format!("You said: {prompt}")
            .split_inclusive(' ')
            .map(str::to_string)
            .collect();
        let chunks = futures::StreamExt::then(futures::stream::iter(words), |word| async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
            Ok(StreamChunk::Text(word))
        });
        Ok(ResponseStream::new(chunks))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

struct EchoAgentFactory;

impl AgentFactory for EchoAgentFactory {
    fn create(&self, mode: &ChatMode) -> Result<Arc<dyn AiAgent>, AgentError> {
        let agent = EchoAgent {
            model_id: format!("echo-{}", mode.name),
            functions: mode.flags.functions,
        };
        Ok(Arc::new(LoggingAgent::new(Arc::new(agent))))
    }
}

/// Prints finished messages and notices to stdout
#[derive(Default)]
struct StdoutSink {
    next_id: AtomicI64,
}

#[async_trait]
impl MessageSink for StdoutSink {
    async fn send_or_edit(&self, chat_id: &ChatId, outgoing: &Outgoing) -> Result<ExternalId, SinkError> {
        if outgoing.complete {
            println!("[{chat_id}] {}", outgoing.text);
            for item in &outgoing.attachments {
                if let Some(media) = item.media() {
                    println!("[{chat_id}] <attachment {}>", media.mime_type);
                }
            }
        }
        Ok(outgoing
            .replace
            .unwrap_or_else(|| ExternalId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)))
    }

    async fn notify(&self, chat_id: &ChatId, notice: Notice) -> Result<(), SinkError> {
        match notice {
            Notice::Reset => println!("[{chat_id}] conversation reset"),
            Notice::Error(text) => println!("[{chat_id}] error: {text} (send a message or /regen)"),
            Notice::ErrorCleared => {}
        }
        Ok(())
    }
}

fn builtin_modes() -> StaticModeSource {
    StaticModeSource::new([
        ChatMode::new("default", "Echo", "You are a helpful echo.").with_flags(ModeFlags {
            functions: true,
            ..ModeFlags::default()
        }),
        ChatMode::new("plain", "Echo", "You are a plain echo."),
    ])
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_core=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let modes: Arc<dyn ModeSource> = match std::env::var("CHAT_MODES_DIR") {
        Ok(dir) => {
            tracing::info!(dir = %dir, "Loading modes from directory");
            Arc::new(DirectoryModeSource::new(dir))
        }
        Err(_) => Arc::new(builtin_modes()),
    };

    let services = ChatServices {
        agents: Arc::new(EchoAgentFactory),
        functions: Arc::new(ToolRegistry::standard()),
        sink: Arc::new(StdoutSink::default()),
        config: ChatConfig::from_env(),
    };
    let registry = Arc::new(ChatRegistry::new(services, modes, "default"));
    let eviction = registry.spawn_eviction(Duration::from_secs(60));

    let id = ChatId::from("console");
    let chat = registry.get_or_create(&id).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let result = match line.split_once(' ').unwrap_or((line, "")) {
            ("", _) => continue,
            ("/quit", _) => break,
            ("/reset", _) => chat.reset().await,
            ("/stop", _) => chat.stop().await,
            ("/continue", _) => chat.continue_response(CancellationToken::new()).await,
            ("/regen", _) => chat.regenerate_response(CancellationToken::new()).await,
            ("/mode", name) => match registry.set_mode_by_name(&id, name.trim()).await {
                Ok(state) => Ok(state),
                Err(e) => {
                    println!("cannot switch mode: {e}");
                    continue;
                }
            },
            _ => match chat.add_messages(vec![Message::user("you", line)]).await {
                Ok(_) => chat.request_response(CancellationToken::new()).await,
                Err(e) => Err(e),
            },
        };

        if let Err(e) = result {
            println!("not performed: {e}");
        }
    }

    registry.shutdown().await;
    eviction.abort();
    Ok(())
}
