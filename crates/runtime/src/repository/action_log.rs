//! Authoritative per-game action log over a [`DocumentStore`].
//!
//! A game is three kinds of documents: the game document, the derived state
//! snapshot, and the log itself split into fixed-capacity chunks. Every
//! write reads all three, builds one [`WriteBatch`] guarded by the versions
//! it read, and commits it while the game's derived cache keys are write
//! locked. A lost commit race surfaces as the retryable
//! [`RuntimeError::UpdateCollision`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use game_core::{
    Action, ActionChecksum, ActionChunk, ActionId, ChunkId, Game, GameDocument, GameId, GameState,
    GameView, PlayerId, TitleId, ValidationError, append_to_chunks, chunk_ids_for_range,
    chunk_number,
};

use super::error::StoreError;
use super::keys::{CacheKeys, Mutation};
use super::traits::{DocKey, Document, DocumentStore, GameQuery, Version, Versioned, WriteBatch};
use super::validator::{
    AppendContext, AppendDecision, AppendValidator, GameUpdate, MissingActions, UndoContext,
    UndoDecision, UndoValidator,
};
use crate::api::{Result, RuntimeError};
use crate::cache::CacheConsistencyService;
use crate::events::{EventBus, Notification};

/// Result of a committed append.
#[derive(Clone, Debug, PartialEq)]
pub struct AppendOutcome {
    /// The appended actions with their assigned indices.
    pub actions: Vec<Action>,
    /// Stored actions requested by the validator, in index order. They sit
    /// right before `actions`.
    pub missing_actions: Vec<Action>,
    pub game: GameDocument,
    pub state: GameState,
}

/// Result of a committed undo.
#[derive(Clone, Debug, PartialEq)]
pub struct UndoOutcome {
    /// The removed suffix as it was stored, target first.
    pub undone: Vec<Action>,
    /// Compensating actions with their assigned indices.
    pub redone: Vec<Action>,
    pub game: GameDocument,
    pub state: GameState,
}

pub struct ActionLogStore {
    store: Arc<dyn DocumentStore>,
    cache: CacheConsistencyService,
    events: EventBus,
    chunk_size: u64,
}

impl ActionLogStore {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        cache: CacheConsistencyService,
        events: EventBus,
        chunk_size: u64,
    ) -> Self {
        Self {
            store,
            cache,
            events,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn cache(&self) -> &CacheConsistencyService {
        &self.cache
    }

    /// Stores a new game. Fails with [`RuntimeError::GameExists`] if the id
    /// is taken.
    pub async fn create_game(&self, mut document: GameDocument, state: GameState) -> Result<Game> {
        let game_id = document.id.clone();
        let keys = CacheKeys::for_mutation(&document, Mutation::CreateGame);
        bump(&mut document);

        let batch = WriteBatch::new()
            .expect(DocKey::Game(game_id.clone()), None)
            .expect(DocKey::State(game_id.clone()), None)
            .put(Document::Game(document.clone()))
            .put(Document::State(game_id.clone(), state.clone()));

        self.cache
            .lock_while_writing(&keys, || async {
                match self.store.commit(batch).await {
                    Err(StoreError::Conflict { .. }) => Err(RuntimeError::GameExists(game_id.clone())),
                    other => other.map_err(RuntimeError::from),
                }
            })
            .await?;

        info!(%game_id, title = %document.title_id, players = document.player_ids.len(), "game created");
        Ok(Game::new(document, state))
    }

    /// Applies auxiliary document changes without touching the log.
    pub async fn update_game(&self, game_id: &GameId, updates: &[GameUpdate]) -> Result<GameDocument> {
        let game = self.read_document(game_id).await?;
        let keys = CacheKeys::for_mutation(&game.value, Mutation::UpdateListing);

        self.cache
            .lock_while_writing(&keys, || async {
                let game = self.read_document(game_id).await?;
                let mut document = game.value;
                for update in updates {
                    update.apply(&mut document);
                }
                bump(&mut document);

                let batch = WriteBatch::new()
                    .expect(DocKey::Game(game_id.clone()), Some(game.version))
                    .put(Document::Game(document.clone()));
                self.commit(game_id, batch, document.etag).await?;
                debug!(%game_id, etag = document.etag, "game updated");
                Ok(document)
            })
            .await
    }

    /// Uncached read of the game document and state.
    pub async fn load_game(&self, game_id: &GameId) -> Result<Game> {
        let (game, state) = self.read_game(game_id).await?;
        Ok(Game::new(game.value, state.value))
    }

    /// Appends `actions` to the end of the log.
    ///
    /// `new_state` is the state the caller computed for after the append; its
    /// count and checksum must follow from the stored state plus `actions`
    /// indexed from the stored tail. Returns `None` when the validator
    /// cancels.
    pub async fn append_actions(
        &self,
        game_id: &GameId,
        actions: Vec<Action>,
        new_state: GameState,
        validator: &dyn AppendValidator,
    ) -> Result<Option<AppendOutcome>> {
        let game = self.read_document(game_id).await?;
        let keys = CacheKeys::for_mutation(&game.value, Mutation::AppendActions);

        let outcome = self
            .cache
            .lock_while_writing(&keys, || self.append_locked(game_id, actions, new_state, validator))
            .await?;

        if let Some(outcome) = &outcome {
            self.events.publish(Notification::ActionsAppended {
                game_id: game_id.clone(),
                actions: outcome.actions.clone(),
            });
        }
        Ok(outcome)
    }

    async fn append_locked(
        &self,
        game_id: &GameId,
        actions: Vec<Action>,
        new_state: GameState,
        validator: &dyn AppendValidator,
    ) -> Result<Option<AppendOutcome>> {
        let (game, state) = self.read_game(game_id).await?;

        let decision = validator.validate(&AppendContext {
            game: &game.value,
            state: &state.value,
            new_state: &new_state,
            actions: &actions,
        })?;
        let plan = match decision {
            AppendDecision::Cancel => {
                debug!(%game_id, "append cancelled by validator");
                return Ok(None);
            }
            AppendDecision::Proceed(plan) => plan,
        };

        let tail = state.value.action_count;
        let count = tail + actions.len() as u64;
        if new_state.action_count != count {
            debug!(%game_id, tail, proposed = new_state.action_count, "append based on stale tail");
            return Err(RuntimeError::UpdateCollision {
                game_id: game_id.clone(),
                tail: new_state.action_count.saturating_sub(actions.len() as u64),
            });
        }

        let indexed: Vec<Action> = actions
            .into_iter()
            .zip(tail..)
            .map(|(action, index)| action.at_index(index))
            .collect();
        let checksum = state.value.action_checksum.fold_actions(&indexed);
        if checksum != new_state.action_checksum {
            warn!(%game_id, expected = %new_state.action_checksum, computed = %checksum, "append checksum mismatch");
            return Err(RuntimeError::ChecksumMismatch {
                game_id: game_id.clone(),
                expected: new_state.action_checksum,
                found: checksum,
            });
        }

        let missing_actions = match &plan.missing_actions {
            Some(missing) => self.collect_missing(game_id, tail, missing).await?,
            None => Vec::new(),
        };

        let tail_chunk = self.tail_chunk(game_id, tail).await?;
        let tail_version = tail_chunk.as_ref().map(|chunk| (chunk.value.id.clone(), chunk.version));
        let touched = append_to_chunks(
            game_id,
            tail_chunk.map(|chunk| chunk.value),
            indexed.clone(),
            self.chunk_size,
        )?;

        let mut document = game.value;
        for update in &plan.game_updates {
            update.apply(&mut document);
        }
        bump(&mut document);

        let mut batch = WriteBatch::new()
            .expect(DocKey::Game(game_id.clone()), Some(game.version))
            .expect(DocKey::State(game_id.clone()), Some(state.version))
            .put(Document::Game(document.clone()))
            .put(Document::State(game_id.clone(), new_state.clone()));
        for chunk in touched {
            let version = match &tail_version {
                Some((id, version)) if *id == chunk.id => Some(*version),
                _ => None,
            };
            batch = batch
                .expect(DocKey::Chunk(chunk.id.clone()), version)
                .put(Document::Chunk(chunk));
        }
        self.commit(game_id, batch, tail).await?;

        debug!(
            %game_id,
            from = tail,
            appended = indexed.len(),
            missing = missing_actions.len(),
            checksum = %new_state.action_checksum,
            "actions appended"
        );
        Ok(Some(AppendOutcome {
            actions: indexed,
            missing_actions,
            game: document,
            state: new_state,
        }))
    }

    /// Removes the stored suffix starting at `actions[0]` and appends
    /// `redone_actions` in its place.
    ///
    /// `actions` must be exactly the stored suffix (a moved log is a
    /// retryable collision). The stored checksum folded over the suffix in
    /// reverse and then over the indexed redo actions must equal
    /// `new_state.action_checksum`; anything else is a hard
    /// [`RuntimeError::ChecksumMismatch`].
    pub async fn undo_actions_from_game(
        &self,
        game_id: &GameId,
        actions: Vec<Action>,
        redone_actions: Vec<Action>,
        new_state: GameState,
        validator: &dyn UndoValidator,
    ) -> Result<Option<UndoOutcome>> {
        let game = self.read_document(game_id).await?;
        let keys = CacheKeys::for_mutation(&game.value, Mutation::UndoActions);

        let outcome = self
            .cache
            .lock_while_writing(&keys, || {
                self.undo_locked(game_id, actions, redone_actions, new_state, validator)
            })
            .await?;

        if let Some(outcome) = &outcome
            && let Some(target) = outcome.undone.first()
        {
            self.events.publish(Notification::ActionsUndone {
                game_id: game_id.clone(),
                undone_action: target.clone(),
                redone_actions: outcome.redone.clone(),
                undone_actions: outcome.undone.clone(),
            });
        }
        Ok(outcome)
    }

    async fn undo_locked(
        &self,
        game_id: &GameId,
        actions: Vec<Action>,
        redone_actions: Vec<Action>,
        new_state: GameState,
        validator: &dyn UndoValidator,
    ) -> Result<Option<UndoOutcome>> {
        let (game, state) = self.read_game(game_id).await?;
        let tail = state.value.action_count;

        let first = match actions.first() {
            Some(action) => action.index,
            None => return Err(ValidationError::illegal("nothing to undo").into()),
        };
        let collision = || RuntimeError::UpdateCollision {
            game_id: game_id.clone(),
            tail: first + actions.len() as u64,
        };
        if first + actions.len() as u64 != tail {
            debug!(%game_id, first, undone = actions.len(), tail, "undo based on stale tail");
            return Err(collision());
        }

        let stored = self.find_action_range_for_game(game_id, first, tail).await?;
        let same_suffix = stored.len() == actions.len()
            && stored.iter().zip(&actions).all(|(stored, given)| stored.id == given.id);
        if !same_suffix {
            debug!(%game_id, first, "undo suffix no longer matches the log");
            return Err(collision());
        }

        let redone: Vec<Action> = redone_actions
            .into_iter()
            .zip(first..)
            .map(|(action, index)| action.at_index(index))
            .collect();
        if new_state.action_count != first + redone.len() as u64 {
            return Err(collision());
        }

        let checksum = state.value.action_checksum.undo_redo(&stored, &redone);
        if checksum != new_state.action_checksum {
            warn!(%game_id, expected = %new_state.action_checksum, computed = %checksum, "undo checksum mismatch");
            return Err(RuntimeError::ChecksumMismatch {
                game_id: game_id.clone(),
                expected: new_state.action_checksum,
                found: checksum,
            });
        }

        let decision = validator.validate(&UndoContext {
            game: &game.value,
            state: &state.value,
            new_state: &new_state,
            undone: &stored,
            redone: &redone,
        })?;
        let updates = match decision {
            UndoDecision::Cancel => {
                debug!(%game_id, "undo cancelled by validator");
                return Ok(None);
            }
            UndoDecision::Proceed(updates) => updates,
        };

        let chunk_ids = chunk_ids_for_range(game_id, first, tail, self.chunk_size);
        let fetched = self.store.get_chunks(&chunk_ids).await?;
        let mut versions: HashMap<ChunkId, Version> = HashMap::new();
        let mut pending: BTreeMap<ChunkId, Option<ActionChunk>> = BTreeMap::new();
        for (id, chunk) in chunk_ids.into_iter().zip(fetched) {
            let chunk = chunk.ok_or_else(|| RuntimeError::not_found("chunk", &id))?;
            versions.insert(id.clone(), chunk.version);
            let mut chunk = chunk.value;
            chunk.remove_from(first.max(chunk.start_index))?;
            pending.insert(id, (!chunk.is_empty()).then_some(chunk));
        }

        let tail_chunk = if first % self.chunk_size == 0 {
            None
        } else {
            let id = ChunkId::new(game_id.clone(), chunk_number(first - 1, self.chunk_size));
            pending.get(&id).cloned().flatten()
        };
        for chunk in append_to_chunks(game_id, tail_chunk, redone.clone(), self.chunk_size)? {
            pending.insert(chunk.id.clone(), Some(chunk));
        }

        let mut document = game.value;
        for update in &updates {
            update.apply(&mut document);
        }
        bump(&mut document);

        let mut batch = WriteBatch::new()
            .expect(DocKey::Game(game_id.clone()), Some(game.version))
            .expect(DocKey::State(game_id.clone()), Some(state.version))
            .put(Document::Game(document.clone()))
            .put(Document::State(game_id.clone(), new_state.clone()));
        for (id, chunk) in pending {
            let key = DocKey::Chunk(id.clone());
            batch = batch.expect(key.clone(), versions.get(&id).copied());
            batch = match chunk {
                Some(chunk) => batch.put(Document::Chunk(chunk)),
                None => batch.delete(key),
            };
        }
        self.commit(game_id, batch, tail).await?;

        debug!(
            %game_id,
            from = first,
            undone = stored.len(),
            redone = redone.len(),
            checksum = %new_state.action_checksum,
            "actions undone"
        );
        Ok(Some(UndoOutcome {
            undone: stored,
            redone,
            game: document,
            state: new_state,
        }))
    }

    /// Actions with index in `[start, end)`, in index order. Indices past the
    /// stored tail are simply absent.
    pub async fn find_action_range_for_game(&self, game_id: &GameId, start: u64, end: u64) -> Result<Vec<Action>> {
        let ids = chunk_ids_for_range(game_id, start, end, self.chunk_size);
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let chunks = self.store.get_chunks(&ids).await?;

        let mut actions = Vec::new();
        for chunk in chunks.into_iter().flatten() {
            actions.extend(chunk.value.actions_in_range(start, end).cloned());
        }
        actions.sort_by_key(|action| action.index);
        Ok(actions)
    }

    /// Looks `action_id` up, scanning chunks from the tail backwards.
    pub async fn find_action(&self, game_id: &GameId, action_id: &ActionId) -> Result<Option<Action>> {
        let state = self.read_state(game_id).await?;
        let Some(last) = state.value.action_count.checked_sub(1) else {
            return Ok(None);
        };

        for number in (0..=chunk_number(last, self.chunk_size)).rev() {
            let id = ChunkId::new(game_id.clone(), number);
            let chunk = self.store.get_chunks(std::slice::from_ref(&id)).await?;
            let found = chunk
                .into_iter()
                .flatten()
                .flat_map(|chunk| chunk.value.actions)
                .rfind(|action| &action.id == action_id);
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }

    /// Game document and state through the cache. Each hit on an existing
    /// game bumps its read counter.
    pub async fn cached_game(&self, game_id: &GameId) -> Result<Option<GameView>> {
        let view = self
            .cache
            .caching_get(&CacheKeys::game(game_id), || self.produce_view(game_id))
            .await?;
        if view.is_some() {
            self.cache.increment_value(&CacheKeys::read_count(game_id), 1).await;
        }
        Ok(view)
    }

    /// Batched [`Self::cached_game`], aligned with `game_ids`.
    pub async fn cached_games(&self, game_ids: &[GameId]) -> Result<Vec<Option<GameView>>> {
        let keys: Vec<String> = game_ids.iter().map(CacheKeys::game).collect();
        let by_key: HashMap<&String, &GameId> = keys.iter().zip(game_ids).collect();

        self.cache
            .caching_get_multi(&keys, |missing| async move {
                let mut views = Vec::with_capacity(missing.len());
                for key in &missing {
                    let view = match by_key.get(key) {
                        Some(game_id) => self.produce_view(game_id).await?,
                        None => None,
                    };
                    views.push(view);
                }
                Ok::<_, RuntimeError>(views)
            })
            .await
    }

    pub async fn cached_checksum(&self, game_id: &GameId) -> Result<Option<ActionChecksum>> {
        self.cache
            .caching_get(&CacheKeys::checksum(game_id), || async {
                let state = self.store.get_state(game_id).await?;
                Ok::<_, RuntimeError>(state.map(|state| state.value.action_checksum))
            })
            .await
    }

    pub async fn cached_etag(&self, game_id: &GameId) -> Result<Option<u64>> {
        self.cache
            .caching_get(&CacheKeys::etag(game_id), || async {
                let game = self.store.get_game(game_id).await?;
                Ok::<_, RuntimeError>(game.map(|game| game.value.etag))
            })
            .await
    }

    /// How often [`Self::cached_game`] served this game. Best effort.
    pub async fn read_count(&self, game_id: &GameId) -> Option<i64> {
        self.cache.counter(&CacheKeys::read_count(game_id)).await
    }

    pub async fn active_games_for_player(&self, player: &PlayerId) -> Result<Vec<GameId>> {
        self.cached_listing(CacheKeys::active_games(player), GameQuery::ActiveForPlayer(player.clone()))
            .await
    }

    pub async fn open_games_for_title(&self, title: &TitleId) -> Result<Vec<GameId>> {
        self.cached_listing(CacheKeys::open_games(title), GameQuery::OpenForTitle(title.clone()))
            .await
    }

    pub async fn public_games(&self) -> Result<Vec<GameId>> {
        self.cached_listing(CacheKeys::public_games(), GameQuery::Public).await
    }

    async fn cached_listing(&self, key: String, query: GameQuery) -> Result<Vec<GameId>> {
        let ids = self
            .cache
            .caching_get(&key, || async {
                let ids = self.store.query_games(&query).await?;
                Ok::<_, RuntimeError>(Some(ids))
            })
            .await?;
        Ok(ids.unwrap_or_default())
    }

    async fn produce_view(&self, game_id: &GameId) -> Result<Option<GameView>> {
        let game = self.store.get_game(game_id).await?;
        let state = self.store.get_state(game_id).await?;
        Ok(match (game, state) {
            (Some(game), Some(state)) => Some(GameView {
                document: game.value,
                state: state.value,
            }),
            _ => None,
        })
    }

    async fn read_document(&self, game_id: &GameId) -> Result<Versioned<GameDocument>> {
        self.store
            .get_game(game_id)
            .await?
            .ok_or_else(|| RuntimeError::not_found("game", game_id))
    }

    async fn read_state(&self, game_id: &GameId) -> Result<Versioned<GameState>> {
        self.store
            .get_state(game_id)
            .await?
            .ok_or_else(|| RuntimeError::not_found("game state", game_id))
    }

    async fn read_game(&self, game_id: &GameId) -> Result<(Versioned<GameDocument>, Versioned<GameState>)> {
        let game = self.read_document(game_id).await?;
        let state = self.read_state(game_id).await?;
        Ok((game, state))
    }

    /// Chunk holding the last action when the log does not end on a chunk
    /// boundary.
    async fn tail_chunk(&self, game_id: &GameId, count: u64) -> Result<Option<Versioned<ActionChunk>>> {
        if count % self.chunk_size == 0 {
            return Ok(None);
        }
        let id = ChunkId::new(game_id.clone(), chunk_number(count - 1, self.chunk_size));
        let chunk = self
            .store
            .get_chunks(std::slice::from_ref(&id))
            .await?
            .into_iter()
            .next()
            .flatten()
            .ok_or_else(|| RuntimeError::not_found("chunk", &id))?;
        Ok(Some(chunk))
    }

    /// The `missing.count` stored actions right before `tail`, all of which
    /// must belong to `missing.group_id`.
    async fn collect_missing(&self, game_id: &GameId, tail: u64, missing: &MissingActions) -> Result<Vec<Action>> {
        let stale = || RuntimeError::StaleTail {
            game_id: game_id.clone(),
            proposed: tail.saturating_sub(missing.count),
            tail,
        };
        if missing.count > tail {
            return Err(stale());
        }

        let actions = self
            .find_action_range_for_game(game_id, tail - missing.count, tail)
            .await?;
        if actions.len() as u64 != missing.count {
            return Err(RuntimeError::not_found("actions before tail", tail));
        }
        if let Some(outsider) = actions
            .iter()
            .find(|action| action.simultaneous_group_id.as_ref() != Some(&missing.group_id))
        {
            debug!(%game_id, action = %outsider.id, group = %missing.group_id, "missing action outside group");
            return Err(stale());
        }
        Ok(actions)
    }

    async fn commit(&self, game_id: &GameId, batch: WriteBatch, tail: u64) -> Result<()> {
        match self.store.commit(batch).await {
            Ok(()) => Ok(()),
            Err(StoreError::Conflict { key }) => {
                debug!(%game_id, %key, tail, "commit lost optimistic race");
                Err(RuntimeError::UpdateCollision {
                    game_id: game_id.clone(),
                    tail,
                })
            }
            Err(error) => Err(error.into()),
        }
    }
}

fn bump(document: &mut GameDocument) {
    document.etag += 1;
    document.updated_at = Utc::now();
}
