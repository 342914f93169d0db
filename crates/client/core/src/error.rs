use thiserror::Error;

use game_core::{ActionChecksum, UndoError, ValidationError};

use crate::api::ApiError;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The local reducer refused the action before it was sent.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("rejected by server: {0}")]
    Rejected(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("local log diverged: server checksum {expected}, local {found}")]
    Desync {
        expected: ActionChecksum,
        found: ActionChecksum,
    },

    #[error("history mode is read only")]
    ReadOnlyHistory,

    #[error("not in history mode")]
    NotInHistory,

    #[error("undo not allowed: {0}")]
    UndoNotAllowed(UndoError),

    #[error("sync worker has stopped")]
    WorkerClosed,
}

impl From<ApiError> for SyncError {
    fn from(error: ApiError) -> Self {
        match error {
            ApiError::Rejected(reason) => SyncError::Rejected(reason),
            ApiError::Transport(reason) => SyncError::Transport(reason),
        }
    }
}

impl From<UndoError> for SyncError {
    fn from(error: UndoError) -> Self {
        match error {
            UndoError::Rules(validation) => SyncError::Validation(validation),
            other => SyncError::UndoNotAllowed(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_keep_their_kind() {
        assert!(matches!(
            SyncError::from(ApiError::Transport("reset".into())),
            SyncError::Transport(_)
        ));
        assert!(matches!(
            SyncError::from(UndoError::Rules(ValidationError::GameFinished)),
            SyncError::Validation(_)
        ));
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync + 'static>() {}
        assert_send_sync::<SyncError>();
    }
}
