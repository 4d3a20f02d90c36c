//! Snippet storage for share links
//!
//! Snippets are write-once: `save` mints a short identifier, `fetch` looks it up.
//! There is no update or delete operation.

mod error;
mod memory;
mod snippet;
mod store;

pub use error::{StoreError, StoreResult};
pub use memory::{MemoryStore, StoreLimits};
pub use snippet::{Snippet, SnippetId, DEFAULT_ID_LENGTH};
pub use store::SnippetStore;
