//! Runtime configuration for chats

use std::time::Duration;

pub const DEFAULT_MAX_TOOL_DEPTH: usize = 5;
pub const DEFAULT_EDIT_INTERVAL: Duration = Duration::from_millis(750);
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_CONTINUE_PROMPT: &str =
    "Continue your previous answer exactly where it stopped. Do not repeat what you already wrote.";

/// Configuration shared by all chats of a process
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Maximum number of tool-call rounds in one response
    pub max_tool_depth: usize,
    /// Minimum time between two live edits of a streaming message
    pub edit_interval: Duration,
    /// Instruction appended to the last turn by "continue"
    pub continue_prompt: String,
    /// Idle time after which the registry drops a chat
    pub idle_ttl: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_tool_depth: DEFAULT_MAX_TOOL_DEPTH,
            edit_interval: DEFAULT_EDIT_INTERVAL,
            continue_prompt: DEFAULT_CONTINUE_PROMPT.to_string(),
            idle_ttl: DEFAULT_IDLE_TTL,
        }
    }
}

impl ChatConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset or unparsable values fall
    /// back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let number = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            max_tool_depth: number("CHAT_MAX_TOOL_DEPTH")
                .and_then(|v| usize::try_from(v).ok())
                .unwrap_or(defaults.max_tool_depth),
            edit_interval: number("CHAT_EDIT_INTERVAL_MS")
                .map_or(defaults.edit_interval, Duration::from_millis),
            continue_prompt: lookup("CHAT_CONTINUE_PROMPT")
                .filter(|p| !p.trim().is_empty())
                .unwrap_or(defaults.continue_prompt),
            idle_ttl: number("CHAT_IDLE_TTL_SECS").map_or(defaults.idle_ttl, Duration::from_secs),
        }
    }
}
