//! Contract for the authoritative, transactional document store.
//!
//! Every document carries a version that changes on each write. Readers keep
//! the versions they saw and hand them back as preconditions of a
//! [`WriteBatch`]; the store applies the batch only if nothing moved in
//! between. That optimistic check is the only race detector the action log
//! relies on.

use std::fmt;

use async_trait::async_trait;

use game_core::{ActionChunk, ChunkId, GameDocument, GameId, GameState, PlayerId, TitleId};

use super::error::StoreResult;

pub type Version = u64;

/// A document together with the version it was read at.
#[derive(Clone, Debug, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: Version,
}

impl<T> Versioned<T> {
    pub fn new(value: T, version: Version) -> Self {
        Self { value, version }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DocKey {
    Game(GameId),
    State(GameId),
    Chunk(ChunkId),
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocKey::Game(id) => write!(f, "games/{id}"),
            DocKey::State(id) => write!(f, "states/{id}"),
            DocKey::Chunk(id) => write!(f, "chunks/{id}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Document {
    Game(GameDocument),
    State(GameId, GameState),
    Chunk(ActionChunk),
}

impl Document {
    pub fn key(&self) -> DocKey {
        match self {
            Document::Game(game) => DocKey::Game(game.id.clone()),
            Document::State(id, _) => DocKey::State(id.clone()),
            Document::Chunk(chunk) => DocKey::Chunk(chunk.id.clone()),
        }
    }
}

/// Listing queries over game documents.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum GameQuery {
    /// Active games the player is seated in.
    ActiveForPlayer(PlayerId),
    /// Games of a title waiting for players.
    OpenForTitle(TitleId),
    /// Public games that are not finished.
    Public,
}

impl GameQuery {
    pub fn matches(&self, game: &GameDocument) -> bool {
        use game_core::GameStatus;
        match self {
            GameQuery::ActiveForPlayer(player) => {
                game.status == GameStatus::Active && game.has_player(player)
            }
            GameQuery::OpenForTitle(title) => {
                game.status == GameStatus::Open && &game.title_id == title
            }
            GameQuery::Public => game.public && game.status != GameStatus::Finished,
        }
    }
}

/// Atomic set of writes guarded by version preconditions.
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    /// `None` requires the document not to exist.
    pub preconditions: Vec<(DocKey, Option<Version>)>,
    pub puts: Vec<Document>,
    pub deletes: Vec<DocKey>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect(mut self, key: DocKey, version: Option<Version>) -> Self {
        self.preconditions.push((key, version));
        self
    }

    pub fn put(mut self, document: Document) -> Self {
        self.puts.push(document);
        self
    }

    pub fn delete(mut self, key: DocKey) -> Self {
        self.deletes.push(key);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.puts.is_empty() && self.deletes.is_empty()
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_game(&self, id: &GameId) -> StoreResult<Option<Versioned<GameDocument>>>;

    async fn get_state(&self, id: &GameId) -> StoreResult<Option<Versioned<GameState>>>;

    /// Bulk point read, aligned with `ids`.
    async fn get_chunks(&self, ids: &[ChunkId]) -> StoreResult<Vec<Option<Versioned<ActionChunk>>>>;

    /// Ids of matching games, sorted.
    async fn query_games(&self, query: &GameQuery) -> StoreResult<Vec<GameId>>;

    /// Applies `batch` atomically, or fails with
    /// [`super::StoreError::Conflict`] if any precondition no longer holds.
    async fn commit(&self, batch: WriteBatch) -> StoreResult<()>;
}
