//! Chat modes and where they come from
//!
//! A mode bundles the agent's display name, its system prompt and the
//! capability flags the agent is created with. Assigning a mode always
//! replaces the previous one as a whole.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Capability flags of a mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeFlags {
    /// Allow the agent to request function calls
    pub functions: bool,
    /// Allow the agent to produce images
    pub images: bool,
    /// Use the faster, cheaper model variant
    pub fast: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMode {
    pub name: String,
    pub display_name: String,
    pub system_prompt: String,
    #[serde(flatten)]
    pub flags: ModeFlags,
}

impl ChatMode {
    pub fn new(
        name: impl Into<String>,
        display_name: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            system_prompt: system_prompt.into(),
            flags: ModeFlags::default(),
        }
    }

    #[must_use]
    pub fn with_flags(mut self, flags: ModeFlags) -> Self {
        self.flags = flags;
        self
    }
}

#[derive(Debug, Error)]
pub enum ModeError {
    #[error("unknown mode: {0}")]
    NotFound(String),
    #[error("invalid mode name: {0}")]
    InvalidName(String),
    #[error("failed to read mode {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse mode {name}: {source}")]
    Parse {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Source of mode definitions
#[async_trait]
pub trait ModeSource: Send + Sync {
    async fn load_mode(&self, name: &str) -> Result<ChatMode, ModeError>;
}

/// Modes held in memory
#[derive(Debug, Clone, Default)]
pub struct StaticModeSource {
    modes: HashMap<String, ChatMode>,
}

impl StaticModeSource {
    pub fn new(modes: impl IntoIterator<Item = ChatMode>) -> Self {
        Self {
            modes: modes.into_iter().map(|m| (m.name.clone(), m)).collect(),
        }
    }
}

#[async_trait]
impl ModeSource for StaticModeSource {
    async fn load_mode(&self, name: &str) -> Result<ChatMode, ModeError> {
        self.modes
            .get(name)
            .cloned()
            .ok_or_else(|| ModeError::NotFound(name.to_string()))
    }
}

/// Modes stored as `<dir>/<name>.json`
///
/// The file holds `display_name`, `system_prompt` and optional flags; the
/// mode name comes from the file name.
#[derive(Debug, Clone)]
pub struct DirectoryModeSource {
    dir: PathBuf,
}

#[derive(Deserialize)]
struct ModeFile {
    display_name: String,
    system_prompt: String,
    #[serde(flatten)]
    flags: ModeFlags,
}

impl DirectoryModeSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, ModeError> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(ModeError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(format!("{name}.json")))
    }
}

#[async_trait]
impl ModeSource for DirectoryModeSource {
    async fn load_mode(&self, name: &str) -> Result<ChatMode, ModeError> {
        let path = self.path_for(name)?;
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ModeError::NotFound(name.to_string()));
            }
            Err(source) => {
                return Err(ModeError::Io {
                    name: name.to_string(),
                    source,
                })
            }
        };
        let file: ModeFile = serde_json::from_str(&raw).map_err(|source| ModeError::Parse {
            name: name.to_string(),
            source,
        })?;
        tracing::debug!(mode = %name, path = %path.display(), "Loaded mode");
        Ok(ChatMode {
            name: name.to_string(),
            display_name: file.display_name,
            system_prompt: file.system_prompt,
            flags: file.flags,
        })
    }
}
