//! Pluggable conversation storage.
//!
//! The [`ConversationStore`] capability is what the rest of the engine
//! consumes: an in-memory backend for tests and a file-per-conversation
//! backend for production. Appends to the same conversation are
//! serialized; a read after an append observes the new entry.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use percent_encoding::{percent_encode, NON_ALPHANUMERIC};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use kotoba_types::conversation::{ConversationContext, ConversationEntry};
use kotoba_types::{KotobaError, Result};

/// Storage capability for conversation contexts.
///
/// All operations are idempotent with respect to the conversation id.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Snapshot of the context, or `None` if it does not exist.
    async fn get(&self, id: &str) -> Result<Option<ConversationContext>>;

    /// Replace the context wholesale.
    async fn put(&self, id: &str, context: ConversationContext) -> Result<()>;

    /// Append one entry, creating the context if absent and trimming to
    /// the configured history bound. Returns the updated snapshot.
    async fn append_entry(&self, id: &str, entry: ConversationEntry) -> Result<ConversationContext>;

    /// Delete contexts idle longer than `max_age`; returns the count.
    async fn gc(&self, max_age: Duration) -> Result<usize>;
}

fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 256 {
        return Err(KotobaError::InvalidConversationId {
            reason: format!("length {} out of range 1..=256", id.len()),
        });
    }
    Ok(())
}

// ── In-memory backend ────────────────────────────────────────────────────

/// Map-backed store for tests and single-process deployments.
pub struct MemoryConversationStore {
    max_history: usize,
    contexts: Mutex<HashMap<String, ConversationContext>>,
}

impl MemoryConversationStore {
    /// An empty store trimming histories to `max_history` entries.
    pub fn new(max_history: usize) -> Self {
        Self {
            max_history,
            contexts: Mutex::new(HashMap::new()),
        }
    }

    /// Convenience: an `Arc`'d store.
    pub fn shared(max_history: usize) -> Arc<Self> {
        Arc::new(Self::new(max_history))
    }

    /// Number of live contexts.
    pub async fn len(&self) -> usize {
        self.contexts.lock().await.len()
    }

    /// `true` when no context exists.
    pub async fn is_empty(&self) -> bool {
        self.contexts.lock().await.is_empty()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn get(&self, id: &str) -> Result<Option<ConversationContext>> {
        validate_id(id)?;
        Ok(self.contexts.lock().await.get(id).cloned())
    }

    async fn put(&self, id: &str, context: ConversationContext) -> Result<()> {
        validate_id(id)?;
        self.contexts.lock().await.insert(id.to_string(), context);
        Ok(())
    }

    async fn append_entry(&self, id: &str, entry: ConversationEntry) -> Result<ConversationContext> {
        validate_id(id)?;
        let mut contexts = self.contexts.lock().await;
        let context = contexts
            .entry(id.to_string())
            .or_insert_with(|| ConversationContext::new(id));
        context.push_entry(entry, self.max_history);
        Ok(context.clone())
    }

    async fn gc(&self, max_age: Duration) -> Result<usize> {
        let cutoff = Utc::now() - max_age;
        let mut contexts = self.contexts.lock().await;
        let before = contexts.len();
        contexts.retain(|_, context| context.updated_at >= cutoff);
        Ok(before - contexts.len())
    }
}

// ── File backend ─────────────────────────────────────────────────────────

/// One JSON file per conversation under a configurable directory,
/// fronted by a write-through in-memory cache.
pub struct FileConversationStore {
    dir: PathBuf,
    max_history: usize,
    cache: Mutex<HashMap<String, ConversationContext>>,
}

impl FileConversationStore {
    /// Open (and create) the storage directory.
    pub async fn new(dir: impl Into<PathBuf>, max_history: usize) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            max_history,
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        let encoded = percent_encode(id.as_bytes(), NON_ALPHANUMERIC).to_string();
        self.dir.join(format!("{encoded}.json"))
    }

    async fn load(&self, id: &str) -> Result<Option<ConversationContext>> {
        let path = self.path_for(id);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&raw) {
            Ok(context) => Ok(Some(context)),
            Err(e) => {
                warn!(id, error = %e, "malformed conversation file, treating as absent");
                Ok(None)
            }
        }
    }

    async fn persist(&self, context: &ConversationContext) -> Result<()> {
        let path = self.path_for(&context.conversation_id);
        let raw = serde_json::to_vec_pretty(context)?;
        tokio::fs::write(&path, raw).await?;
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for FileConversationStore {
    async fn get(&self, id: &str) -> Result<Option<ConversationContext>> {
        validate_id(id)?;
        {
            let cache = self.cache.lock().await;
            if let Some(context) = cache.get(id) {
                return Ok(Some(context.clone()));
            }
        }
        let loaded = self.load(id).await?;
        if let Some(context) = &loaded {
            self.cache
                .lock()
                .await
                .insert(id.to_string(), context.clone());
        }
        Ok(loaded)
    }

    async fn put(&self, id: &str, context: ConversationContext) -> Result<()> {
        validate_id(id)?;
        self.persist(&context).await?;
        self.cache.lock().await.insert(id.to_string(), context);
        Ok(())
    }

    async fn append_entry(&self, id: &str, entry: ConversationEntry) -> Result<ConversationContext> {
        validate_id(id)?;
        // The cache lock is held across the read-modify-write so appends
        // to the same conversation are serialized.
        let mut cache = self.cache.lock().await;
        let mut context = match cache.get(id) {
            Some(context) => context.clone(),
            None => self
                .load(id)
                .await?
                .unwrap_or_else(|| ConversationContext::new(id)),
        };
        context.push_entry(entry, self.max_history);
        self.persist(&context).await?;
        cache.insert(id.to_string(), context.clone());
        debug!(id, entries = context.entries.len(), "appended conversation entry");
        Ok(context)
    }

    async fn gc(&self, max_age: Duration) -> Result<usize> {
        let cutoff = Utc::now() - max_age;
        let mut removed = 0;

        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        while let Some(file) = dir.next_entry().await? {
            let path = file.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let stale = match tokio::fs::read_to_string(&path).await {
                Ok(raw) => serde_json::from_str::<ConversationContext>(&raw)
                    .map(|context| context.updated_at < cutoff)
                    .unwrap_or(true),
                Err(_) => true,
            };
            if stale && tokio::fs::remove_file(&path).await.is_ok() {
                removed += 1;
            }
        }

        let mut cache = self.cache.lock().await;
        cache.retain(|_, context| context.updated_at >= cutoff);
        Ok(removed)
    }
}
