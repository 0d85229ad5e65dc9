//! Media payloads for content items
//!
//! Inline media carries its base64 payload directly. Remote media carries a
//! reference plus a loader; the first `resolve` call fetches the payload and
//! every later call (including concurrent ones) shares that single outcome.
//! A failed fetch is remembered and never retried. A cancelled fetch is not
//! remembered, so the next caller starts a fresh one.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

/// Errors from resolving a media payload
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("media unavailable: {0}")]
    Unavailable(String),
    #[error("media load cancelled")]
    Cancelled,
}

/// Fetches the raw bytes behind a remote media reference
#[async_trait]
pub trait MediaLoader: Send + Sync {
    async fn load(&self, url: &str, cancel: &CancellationToken) -> Result<Vec<u8>, MediaError>;
}

/// Memoized outcome of a remote fetch: the encoded payload or the reason it
/// is permanently unavailable.
type Resolved = Result<Arc<str>, String>;

/// Binary attachment of a message (image, audio, document, video)
#[derive(Debug, Clone)]
pub struct Media {
    pub mime_type: String,
    source: MediaSource,
}

#[derive(Debug, Clone)]
enum MediaSource {
    Inline(Arc<str>),
    Remote(RemoteMedia),
}

impl Media {
    /// Media from raw bytes, encoded once up front
    pub fn inline(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            source: MediaSource::Inline(Arc::from(BASE64.encode(bytes))),
        }
    }

    /// Media from an already base64-encoded payload
    pub fn inline_base64(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            source: MediaSource::Inline(Arc::from(data.into())),
        }
    }

    /// Media fetched lazily from `url`. The mime type is guessed from the
    /// URL path.
    pub fn remote(url: impl Into<String>, loader: Arc<dyn MediaLoader>) -> Self {
        let url = url.into();
        let path = url.split(['?', '#']).next().unwrap_or_default();
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Self {
            mime_type,
            source: MediaSource::Remote(RemoteMedia {
                url,
                loader,
                cell: OnceCell::new(),
            }),
        }
    }

    /// Remote reference, if this media is not inline
    pub fn url(&self) -> Option<&str> {
        match &self.source {
            MediaSource::Inline(_) => None,
            MediaSource::Remote(remote) => Some(&remote.url),
        }
    }

    /// Payload of inline media
    pub fn inline_data(&self) -> Option<&str> {
        match &self.source {
            MediaSource::Inline(data) => Some(data),
            MediaSource::Remote(_) => None,
        }
    }

    /// True once the payload is available without I/O
    pub fn is_resolved(&self) -> bool {
        match &self.source {
            MediaSource::Inline(_) => true,
            MediaSource::Remote(remote) => matches!(remote.cell.get(), Some(Ok(_))),
        }
    }

    /// True if an earlier fetch failed; such media is never fetched again
    pub fn is_unavailable(&self) -> bool {
        match &self.source {
            MediaSource::Inline(_) => false,
            MediaSource::Remote(remote) => matches!(remote.cell.get(), Some(Err(_))),
        }
    }

    /// Base64 payload, fetching it on first use
    pub async fn resolve(&self, cancel: &CancellationToken) -> Result<Arc<str>, MediaError> {
        match &self.source {
            MediaSource::Inline(data) => Ok(Arc::clone(data)),
            MediaSource::Remote(remote) => remote.resolve(cancel).await,
        }
    }
}

struct RemoteMedia {
    url: String,
    loader: Arc<dyn MediaLoader>,
    cell: OnceCell<Resolved>,
}

impl RemoteMedia {
    async fn resolve(&self, cancel: &CancellationToken) -> Result<Arc<str>, MediaError> {
        // get_or_try_init keeps the cell empty when the init future errors or
        // is dropped, so only real outcomes are memoized.
        let init = self.cell.get_or_try_init(|| async {
            match self.loader.load(&self.url, cancel).await {
                Ok(bytes) => Ok(Ok(Arc::from(BASE64.encode(bytes)))),
                Err(MediaError::Cancelled) => Err(MediaError::Cancelled),
                Err(MediaError::Unavailable(reason)) => {
                    tracing::warn!(url = %self.url, %reason, "Media fetch failed, marking unavailable");
                    Ok(Err(reason))
                }
            }
        });

        let resolved = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(MediaError::Cancelled),
            resolved = init => resolved?,
        };

        resolved.clone().map_err(MediaError::Unavailable)
    }
}

impl Clone for RemoteMedia {
    // The loader is shared; the memo cell is snapshotted so a clone keeps
    // whatever was already resolved but fetches independently otherwise.
    fn clone(&self) -> Self {
        Self {
            url: self.url.clone(),
            loader: Arc::clone(&self.loader),
            cell: OnceCell::new_with(self.cell.get().cloned()),
        }
    }
}

impl fmt::Debug for RemoteMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.cell.get() {
            None => "unresolved",
            Some(Ok(_)) => "resolved",
            Some(Err(_)) => "unavailable",
        };
        f.debug_struct("RemoteMedia")
            .field("url", &self.url)
            .field("state", &state)
            .finish_non_exhaustive()
    }
}

/// Loader that fetches media over HTTP
#[derive(Debug, Clone, Default)]
pub struct HttpMediaLoader {
    client: reqwest::Client,
}

impl HttpMediaLoader {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MediaLoader for HttpMediaLoader {
    async fn load(&self, url: &str, cancel: &CancellationToken) -> Result<Vec<u8>, MediaError> {
        let fetch = async {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| MediaError::Unavailable(e.to_string()))?;
            let bytes = response
                .bytes()
                .await
                .map_err(|e| MediaError::Unavailable(e.to_string()))?;
            Ok(bytes.to_vec())
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(MediaError::Cancelled),
            result = fetch => result,
        }
    }
}
