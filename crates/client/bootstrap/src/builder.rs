//! Builds the in-process server and the client sessions attached to it.
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use client_core::{SyncCoordinator, SyncHandle, SyncWorker};
use game_core::{GameId, GameRules, PlayerId, Push};
use runtime::{
    ActionLogStore, CacheBackend, CacheConsistencyService, DocumentStore, EventBus, GameService,
    MemoryCacheBackend, MemoryDocumentStore, Notification, RuntimeConfig, Topic,
};

use crate::config::SyncConfig;
use crate::local::LocalTransport;

/// Assembles a [`GameService`] over pluggable store and cache backends.
pub struct ServerBuilder {
    config: RuntimeConfig,
    rules: Option<Arc<dyn GameRules>>,
    store: Option<Arc<dyn DocumentStore>>,
    cache: Option<Arc<dyn CacheBackend>>,
}

impl ServerBuilder {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            rules: None,
            store: None,
            cache: None,
        }
    }

    /// Set the rule set served (required).
    pub fn rules(mut self, rules: impl GameRules + 'static) -> Self {
        self.rules = Some(Arc::new(rules));
        self
    }

    /// Document store; in-memory when not set.
    pub fn store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Cache backend; in-memory when not set.
    pub fn cache(mut self, cache: Arc<dyn CacheBackend>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn build(self) -> Result<GameService> {
        self.config.validate().context("invalid server configuration")?;
        let rules = self
            .rules
            .context("Rules are required. Use .rules() to set them.")?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryDocumentStore::new()) as Arc<dyn DocumentStore>);
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(MemoryCacheBackend::new()) as Arc<dyn CacheBackend>);

        let log = ActionLogStore::new(
            store,
            CacheConsistencyService::new(cache, &self.config),
            EventBus::with_capacity(self.config.event_buffer_size),
            self.config.chunk_size,
        );
        info!(title = %rules.title(), chunk_size = self.config.chunk_size, "server ready");
        Ok(GameService::new(Arc::new(log), rules, self.config))
    }
}

/// Attaches one player's replica to a game served by a [`LocalTransport`].
#[derive(Default)]
pub struct SessionBuilder {
    config: SyncConfig,
    transport: Option<Arc<LocalTransport>>,
    game_id: Option<GameId>,
    player_id: Option<PlayerId>,
}

impl SessionBuilder {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Set the transport (required).
    pub fn transport(mut self, transport: Arc<LocalTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the game to follow (required).
    pub fn game(mut self, game_id: impl Into<GameId>) -> Self {
        self.game_id = Some(game_id.into());
        self
    }

    /// Set the acting player (required).
    pub fn player(mut self, player_id: impl Into<PlayerId>) -> Self {
        self.player_id = Some(player_id.into());
        self
    }

    /// Connects the replica and starts its sync worker and push forwarder.
    ///
    /// # Errors
    ///
    /// Returns an error if a required field is missing or the initial fetch
    /// fails.
    pub async fn build(self) -> Result<Session> {
        let transport = self
            .transport
            .context("Transport is required. Use .transport() to set it.")?;
        let game_id = self.game_id.context("Game is required. Use .game() to set it.")?;
        let player_id = self
            .player_id
            .context("Player is required. Use .player() to set it.")?;

        // Subscribe before the initial fetch so no commit falls in between.
        let service = transport.service();
        let appends = service.events().subscribe(Topic::Append);
        let undos = service.events().subscribe(Topic::Undo);

        let coordinator = SyncCoordinator::connect(
            transport.clone(),
            service.rules().clone(),
            &game_id,
            player_id.clone(),
        )
        .await
        .with_context(|| format!("connecting {player_id} to game {game_id}"))?;

        let (handle, worker) = SyncWorker::spawn(coordinator, self.config.buffer);
        let forwarder = tokio::spawn(forward_pushes(
            game_id.clone(),
            appends,
            undos,
            handle.push_sender(),
        ));

        Ok(Session {
            player_id,
            game_id,
            handle,
            transport,
            worker,
            forwarder,
        })
    }
}

/// A connected replica and the tasks serving it.
pub struct Session {
    player_id: PlayerId,
    game_id: GameId,
    handle: SyncHandle,
    transport: Arc<LocalTransport>,
    worker: JoinHandle<()>,
    forwarder: JoinHandle<()>,
}

impl Session {
    pub fn player_id(&self) -> &PlayerId {
        &self.player_id
    }

    pub fn game_id(&self) -> &GameId {
        &self.game_id
    }

    pub fn handle(&self) -> &SyncHandle {
        &self.handle
    }

    pub fn transport(&self) -> &Arc<LocalTransport> {
        &self.transport
    }

    pub async fn shutdown(self) {
        self.forwarder.abort();
        self.worker.abort();
        let _ = self.worker.await;
        debug!(player = %self.player_id, "session closed");
    }
}

/// Relays bus notifications for `game_id` to a sync worker.
async fn forward_pushes(
    game_id: GameId,
    mut appends: broadcast::Receiver<Notification>,
    mut undos: broadcast::Receiver<Notification>,
    pushes: mpsc::Sender<Push>,
) {
    loop {
        let received = tokio::select! {
            received = appends.recv() => received,
            received = undos.recv() => received,
        };
        match received {
            Ok(notification) if notification.game_id() == &game_id => {
                if pushes.send(notification.into()).await.is_err() {
                    break;
                }
            }
            Ok(_) => {}
            // The next push leaves a gap, which the worker resyncs over.
            Err(RecvError::Lagged(skipped)) => warn!(%game_id, skipped, "push forwarder lagged"),
            Err(RecvError::Closed) => break,
        }
    }
    debug!(%game_id, "push forwarder stopped");
}
