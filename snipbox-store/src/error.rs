use crate::snippet::SnippetId;
use thiserror::Error;

/// Errors surfaced by snippet stores
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("snippet '{0}' not found")]
    NotFound(SnippetId),

    #[error("snippet source is empty")]
    EmptySource,

    #[error("snippet is {size} bytes, limit is {limit} bytes")]
    TooLarge { size: usize, limit: usize },

    #[error("snippet store is full ({limit} entries)")]
    CapacityExhausted { limit: usize },

    #[error("no unused identifier found after {attempts} attempts")]
    IdSpaceExhausted { attempts: usize },
}

pub type StoreResult<T> = Result<T, StoreError>;
