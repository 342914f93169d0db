//! Unified error types surfaced by the server side.
//!
//! Wraps rule violations, index races, store failures and chunk invariant
//! breaches so request handlers can tell retryable collisions apart from
//! everything else.

use thiserror::Error;

use game_core::{ActionChecksum, ChunkError, GameId, UndoError, ValidationError};

use crate::config::ConfigError;
pub use crate::repository::StoreError;

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The log moved between the caller's read and the commit. `tail` is the
    /// action count the losing write was based on.
    #[error("update collision on game {game_id} at tail {tail}")]
    UpdateCollision { game_id: GameId, tail: u64 },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("checksum mismatch on game {game_id}: expected {expected}, computed {found}")]
    ChecksumMismatch {
        game_id: GameId,
        expected: ActionChecksum,
        found: ActionChecksum,
    },

    #[error("undo not allowed: {0}")]
    UndoNotAllowed(UndoError),

    /// The submitter missed actions that cannot be handed back as part of
    /// its simultaneous group.
    #[error("submission for game {game_id} assumed tail {proposed}, log is at {tail}")]
    StaleTail {
        game_id: GameId,
        proposed: u64,
        tail: u64,
    },

    #[error("game {0} already exists")]
    GameExists(GameId),

    #[error(transparent)]
    Chunk(#[from] ChunkError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl RuntimeError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        RuntimeError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Only index collisions are worth replaying against a fresh read.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RuntimeError::UpdateCollision { .. })
    }
}

impl From<UndoError> for RuntimeError {
    fn from(error: UndoError) -> Self {
        match error {
            UndoError::Rules(validation) => RuntimeError::Validation(validation),
            other => RuntimeError::UndoNotAllowed(other),
        }
    }
}
