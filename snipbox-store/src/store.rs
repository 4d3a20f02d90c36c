use crate::error::StoreResult;
use crate::snippet::{Snippet, SnippetId};
use async_trait::async_trait;

/// Key-value contract for shared snippets
#[async_trait]
pub trait SnippetStore: Send + Sync {
    /// Persist `source` under a freshly minted identifier
    async fn save(&self, source: String) -> StoreResult<Snippet>;

    /// Look up a snippet; unknown ids yield [`crate::StoreError::NotFound`]
    async fn fetch(&self, id: &SnippetId) -> StoreResult<Snippet>;

    /// Number of stored snippets
    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Store backend name
    fn name(&self) -> &str;
}
