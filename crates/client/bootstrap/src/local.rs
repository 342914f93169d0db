//! In-process transport from a client replica to a [`GameService`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tracing::debug;

use client_core::{ApiError, GameServerApi};
use game_core::{
    Action, GameId, GameView, SubmitRequest, SubmitResponse, SyncReport, SyncRequest, UndoRequest,
    UndoResponse,
};
use runtime::{GameService, RuntimeError, StoreError};

/// Calls the service directly, with switches to simulate a flaky link.
pub struct LocalTransport {
    service: GameService,
    offline: AtomicBool,
    drop_next: AtomicUsize,
}

impl LocalTransport {
    pub fn new(service: GameService) -> Self {
        Self {
            service,
            offline: AtomicBool::new(false),
            drop_next: AtomicUsize::new(0),
        }
    }

    pub fn service(&self) -> &GameService {
        &self.service
    }

    /// While offline every call fails before reaching the service.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Fails the response of the next `count` calls after the service has
    /// handled them, as if the reply was lost.
    pub fn drop_responses(&self, count: usize) {
        self.drop_next.store(count, Ordering::SeqCst);
    }

    fn check_link(&self) -> Result<(), ApiError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ApiError::Transport("link is down".into()));
        }
        Ok(())
    }

    fn deliver<T>(&self, result: Result<T, RuntimeError>) -> Result<T, ApiError> {
        let lost = self
            .drop_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lost {
            debug!("dropping response");
            return Err(ApiError::Transport("response lost".into()));
        }
        result.map_err(to_api_error)
    }
}

fn to_api_error(error: RuntimeError) -> ApiError {
    match error {
        RuntimeError::Store(StoreError::Unavailable(reason)) => ApiError::Transport(reason),
        other => ApiError::Rejected(other.to_string()),
    }
}

#[async_trait]
impl GameServerApi for LocalTransport {
    async fn get_game(&self, game_id: &GameId) -> Result<GameView, ApiError> {
        self.check_link()?;
        self.deliver(self.service.get_game(game_id).await)
    }

    async fn get_actions(&self, game_id: &GameId, start: u64, end: u64) -> Result<Vec<Action>, ApiError> {
        self.check_link()?;
        self.deliver(self.service.get_actions(game_id, start, end).await)
    }

    async fn submit_action(&self, request: SubmitRequest) -> Result<SubmitResponse, ApiError> {
        self.check_link()?;
        self.deliver(self.service.submit_action(request).await)
    }

    async fn undo_action(&self, request: UndoRequest) -> Result<UndoResponse, ApiError> {
        self.check_link()?;
        self.deliver(self.service.undo_action(request).await)
    }

    async fn check_sync(&self, request: SyncRequest) -> Result<SyncReport, ApiError> {
        self.check_link()?;
        self.deliver(self.service.check_sync(request).await)
    }
}
