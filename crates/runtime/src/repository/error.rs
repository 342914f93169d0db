//! Error types raised by document store implementations.

use thiserror::Error;

/// Errors surfaced by [`super::DocumentStore`] implementations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A write batch precondition no longer holds; another writer committed
    /// first.
    #[error("write conflict on {key}")]
    Conflict { key: String },

    #[error("document store unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
