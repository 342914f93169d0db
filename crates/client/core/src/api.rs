//! The server calls a [`crate::SyncCoordinator`] depends on.

use async_trait::async_trait;
use thiserror::Error;

use game_core::{
    Action, GameId, GameView, SubmitRequest, SubmitResponse, SyncReport, SyncRequest,
    UndoRequest, UndoResponse,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The server processed the request and refused it.
    #[error("rejected by server: {0}")]
    Rejected(String),

    /// The request may or may not have reached the server.
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Request/response contract with the game server.
#[async_trait]
pub trait GameServerApi: Send + Sync {
    async fn get_game(&self, game_id: &GameId) -> Result<GameView, ApiError>;

    /// Actions in `[start, end)`; `end` may run past the tail.
    async fn get_actions(&self, game_id: &GameId, start: u64, end: u64) -> Result<Vec<Action>, ApiError>;

    async fn submit_action(&self, request: SubmitRequest) -> Result<SubmitResponse, ApiError>;

    async fn undo_action(&self, request: UndoRequest) -> Result<UndoResponse, ApiError>;

    async fn check_sync(&self, request: SyncRequest) -> Result<SyncReport, ApiError>;
}
