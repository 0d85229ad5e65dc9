//! Process-wide chat registry
//!
//! Hands out one live `Chat` per id. Creation happens under the registry
//! lock, so two callers racing for a new id get the same chat.

use crate::chat::{Chat, ChatId, ChatServices, ChatState};
use crate::error::ChatError;
use crate::mode::ModeSource;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

struct Entry {
    chat: Arc<Chat>,
    last_used: Instant,
}

pub struct ChatRegistry {
    chats: Mutex<HashMap<ChatId, Entry>>,
    services: ChatServices,
    modes: Arc<dyn ModeSource>,
    default_mode: String,
}

impl ChatRegistry {
    pub fn new(
        services: ChatServices,
        modes: Arc<dyn ModeSource>,
        default_mode: impl Into<String>,
    ) -> Self {
        Self {
            chats: Mutex::new(HashMap::new()),
            services,
            modes,
            default_mode: default_mode.into(),
        }
    }

    /// The live chat for `id`, created in the default mode if needed
    pub async fn get_or_create(&self, id: &ChatId) -> Result<Arc<Chat>, ChatError> {
        let existing = Self::touch(&mut *self.chats.lock().await, id);
        if let Some(chat) = existing {
            return Ok(chat);
        }

        // Mode sources may do I/O; the registry lock is not held across it
        let mode = self.modes.load_mode(&self.default_mode).await?;

        let mut chats = self.chats.lock().await;
        if let Some(chat) = Self::touch(&mut chats, id) {
            return Ok(chat);
        }
        let chat = Arc::new(Chat::new(id.clone(), mode, self.services.clone()).await?);
        chats.insert(
            id.clone(),
            Entry {
                chat: Arc::clone(&chat),
                last_used: Instant::now(),
            },
        );
        tracing::debug!(chat_id = %id, live = chats.len(), "Chat registered");
        Ok(chat)
    }

    fn touch(chats: &mut HashMap<ChatId, Entry>, id: &ChatId) -> Option<Arc<Chat>> {
        let entry = chats.get_mut(id)?;
        entry.last_used = Instant::now();
        Some(Arc::clone(&entry.chat))
    }

    pub async fn get(&self, id: &ChatId) -> Option<Arc<Chat>> {
        self.chats
            .lock()
            .await
            .get(id)
            .map(|entry| Arc::clone(&entry.chat))
    }

    /// Load `name` from the mode source and apply it to the chat
    pub async fn set_mode_by_name(&self, id: &ChatId, name: &str) -> Result<ChatState, ChatError> {
        let mode = self.modes.load_mode(name).await?;
        let chat = self.get_or_create(id).await?;
        Ok(chat.set_mode(mode).await?)
    }

    /// Forget a chat. Its response in flight, if any, is stopped.
    pub async fn remove(&self, id: &ChatId) -> bool {
        let removed = self.chats.lock().await.remove(id);
        match removed {
            Some(entry) => {
                Self::dispose(&entry.chat).await;
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.chats.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.chats.lock().await.is_empty()
    }

    /// Drop chats idle for longer than the configured TTL. Chats producing a
    /// response are kept.
    pub async fn evict_expired(&self) -> usize {
        let ttl = self.services.config.idle_ttl;
        let mut chats = self.chats.lock().await;
        let before = chats.len();
        chats.retain(|id, entry| {
            let keep = entry.last_used.elapsed() < ttl || entry.chat.state().is_busy();
            if !keep {
                tracing::info!(chat_id = %id, "Evicting idle chat");
            }
            keep
        });
        before - chats.len()
    }

    /// Evict expired chats every `period` until the registry is dropped
    pub fn spawn_eviction(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(live) = registry.upgrade() else {
                    break;
                };
                let evicted = live.evict_expired().await;
                if evicted > 0 {
                    tracing::debug!(evicted, "Eviction pass");
                }
            }
        })
    }

    /// Stop every chat and empty the registry
    pub async fn shutdown(&self) {
        let chats: Vec<_> = self.chats.lock().await.drain().collect();
        tracing::info!(count = chats.len(), "Shutting down chats");
        for (_, entry) in chats {
            Self::dispose(&entry.chat).await;
        }
    }

    async fn dispose(chat: &Chat) {
        if chat.state().is_busy() {
            // Not permitted once the response ended on its own
            let _ = chat.stop().await;
        }
    }
}
