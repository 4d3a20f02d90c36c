//! In-memory snippet store

use crate::error::{StoreError, StoreResult};
use crate::snippet::{Snippet, SnippetId, DEFAULT_ID_LENGTH};
use crate::store::SnippetStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Bounds applied by [`MemoryStore`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreLimits {
    /// Length of generated identifiers
    #[serde(default = "StoreLimits::default_id_length")]
    pub id_length: usize,

    /// Largest accepted snippet in bytes (None = unbounded)
    #[serde(default = "StoreLimits::default_max_snippet_bytes")]
    pub max_snippet_bytes: Option<usize>,

    /// Maximum number of stored snippets (None = unbounded)
    #[serde(default)]
    pub max_snippets: Option<usize>,

    /// Identifier draws before giving up on a save
    #[serde(default = "StoreLimits::default_max_id_attempts")]
    pub max_id_attempts: usize,
}

impl StoreLimits {
    fn default_id_length() -> usize {
        DEFAULT_ID_LENGTH
    }

    fn default_max_snippet_bytes() -> Option<usize> {
        Some(256 * 1024)
    }

    fn default_max_id_attempts() -> usize {
        8
    }
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            id_length: Self::default_id_length(),
            max_snippet_bytes: Self::default_max_snippet_bytes(),
            max_snippets: None,
            max_id_attempts: Self::default_max_id_attempts(),
        }
    }
}

/// Volatile snippet store backed by a locked `HashMap`.
///
/// Entries never expire.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snippets: RwLock<HashMap<SnippetId, Snippet>>,
    limits: StoreLimits,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: StoreLimits) -> Self {
        Self {
            snippets: RwLock::new(HashMap::new()),
            limits,
        }
    }

    pub fn limits(&self) -> &StoreLimits {
        &self.limits
    }

    fn check_source(&self, source: &str) -> StoreResult<()> {
        if source.trim().is_empty() {
            return Err(StoreError::EmptySource);
        }
        if let Some(limit) = self.limits.max_snippet_bytes {
            if source.len() > limit {
                return Err(StoreError::TooLarge {
                    size: source.len(),
                    limit,
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SnippetStore for MemoryStore {
    async fn save(&self, source: String) -> StoreResult<Snippet> {
        self.check_source(&source)?;

        // Id selection and insertion happen under one write lock
        let mut snippets = self.snippets.write().await;

        if let Some(limit) = self.limits.max_snippets {
            if snippets.len() >= limit {
                return Err(StoreError::CapacityExhausted { limit });
            }
        }

        let attempts = self.limits.max_id_attempts.max(1);
        for _ in 0..attempts {
            let id = SnippetId::generate(self.limits.id_length);
            if snippets.contains_key(&id) {
                debug!(snippet_id = %id, "Snippet id collision, drawing again");
                continue;
            }

            let snippet = Snippet::new(id.clone(), source);
            snippets.insert(id, snippet.clone());
            debug!(
                snippet_id = %snippet.id,
                bytes = snippet.source.len(),
                "Saved snippet"
            );
            return Ok(snippet);
        }

        Err(StoreError::IdSpaceExhausted { attempts })
    }

    async fn fetch(&self, id: &SnippetId) -> StoreResult<Snippet> {
        let snippets = self.snippets.read().await;
        match snippets.get(id) {
            Some(snippet) => {
                debug!(snippet_id = %id, "Fetched snippet");
                Ok(snippet.clone())
            }
            None => Err(StoreError::NotFound(id.clone())),
        }
    }

    async fn len(&self) -> usize {
        self.snippets.read().await.len()
    }

    fn name(&self) -> &str {
        "memory"
    }
}
