//! The `ContentSource` capability and its registry.
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Context, Result};

use crate::ContentType;

/// Read access to the current value of a content item.
///
/// Implemented by each content type's owning store (the CRUD layer for
/// speeches, social posts, press releases, and content blocks). The engine
/// only ever reads through this trait; it has no write path.
pub trait ContentSource: Send + Sync {
    /// Returns the full current content string for `content_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the item does not exist or the backing store
    /// is unavailable.
    fn current_content(&self, content_id: &str) -> Result<String>;
}

/// Maps each content type to its registered `ContentSource`.
///
/// Shared across sessions via `Arc<ContentRegistry>`. Registration happens
/// at application startup; lookups happen on every checkpoint.
#[derive(Default)]
pub struct ContentRegistry {
    sources: RwLock<HashMap<ContentType, Arc<dyn ContentSource>>>,
}

impl std::fmt::Debug for ContentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.sources.read().map(|s| s.len()).unwrap_or(0);
        f.debug_struct("ContentRegistry")
            .field("registered", &count)
            .finish()
    }
}

impl ContentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the source for a content type.
    pub fn register(&self, content_type: ContentType, source: Arc<dyn ContentSource>) {
        if let Ok(mut sources) = self.sources.write() {
            sources.insert(content_type, source);
        }
    }

    /// Reads the current content of an item through its registered source.
    ///
    /// # Errors
    ///
    /// Returns an error if no source is registered for `content_type` or
    /// the source itself fails the read.
    pub fn current_content(&self, content_type: ContentType, content_id: &str) -> Result<String> {
        let source = {
            let sources = self
                .sources
                .read()
                .map_err(|_| anyhow!("content registry lock poisoned"))?;
            sources
                .get(&content_type)
                .cloned()
                .ok_or_else(|| anyhow!("no content source registered for {content_type}"))?
        };
        source
            .current_content(content_id)
            .with_context(|| format!("failed to read {content_type} content {content_id}"))
    }
}

/// In-memory `ContentSource` backed by a string map.
///
/// Used by tests and by embedding applications that keep drafts in memory.
#[derive(Default)]
pub struct InMemoryContent {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryContent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the current value for an item, creating it if absent.
    pub fn set(&self, content_id: &str, content: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(content_id.to_string(), content.to_string());
        }
    }

    /// Returns the current value, or `None` if the item is unknown.
    pub fn get(&self, content_id: &str) -> Option<String> {
        self.entries
            .read()
            .ok()
            .and_then(|entries| entries.get(content_id).cloned())
    }
}

impl ContentSource for InMemoryContent {
    fn current_content(&self, content_id: &str) -> Result<String> {
        self.get(content_id)
            .ok_or_else(|| anyhow!("unknown content item: {content_id}"))
    }
}
