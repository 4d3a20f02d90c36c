//! Snippet identifiers and records

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};

/// Default identifier length (62^8 possible identifiers)
pub const DEFAULT_ID_LENGTH: usize = 8;

/// Longest identifier accepted from callers
const MAX_ID_LENGTH: usize = 64;

/// Short opaque snippet identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnippetId(String);

impl SnippetId {
    /// Generate a random alphanumeric identifier of `len` characters
    pub fn generate(len: usize) -> Self {
        let id: String = thread_rng()
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect();
        Self(id)
    }

    /// Accept an identifier supplied by a caller.
    ///
    /// Returns `None` for anything that could not have been minted by
    /// [`SnippetId::generate`], so lookups of garbage ids become plain misses.
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = !raw.is_empty()
            && raw.len() <= MAX_ID_LENGTH
            && raw.bytes().all(|b| b.is_ascii_alphanumeric());
        valid.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SnippetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An immutable piece of shared source text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snippet {
    pub id: SnippetId,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

impl Snippet {
    pub(crate) fn new(id: SnippetId, source: String) -> Self {
        Self {
            id,
            source,
            created_at: Utc::now(),
        }
    }
}
