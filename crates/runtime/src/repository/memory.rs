//! In-memory DocumentStore implementation for tests and local runs.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use game_core::{ActionChunk, ChunkId, GameDocument, GameId, GameState};

use super::error::{StoreError, StoreResult};
use super::traits::{DocKey, Document, DocumentStore, GameQuery, Version, Versioned, WriteBatch};

#[derive(Default)]
struct Inner {
    documents: HashMap<DocKey, Versioned<Document>>,
    last_version: Version,
}

/// `HashMap`-backed [`DocumentStore`] with optimistic version checks.
///
/// Versions come from one store-wide counter, so a document that is deleted
/// and re-created never reuses a version a reader may still hold.
pub struct MemoryDocumentStore {
    inner: RwLock<Inner>,
    available: AtomicBool,
    commits: AtomicUsize,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            available: AtomicBool::new(true),
            commits: AtomicUsize::new(0),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of successfully applied batches.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store switched off".into()))
        }
    }

    fn read<T>(&self, key: &DocKey, pick: impl FnOnce(&Document) -> Option<T>) -> StoreResult<Option<Versioned<T>>> {
        self.check_available()?;
        let inner = self
            .inner
            .read()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))?;
        Ok(inner
            .documents
            .get(key)
            .and_then(|doc| pick(&doc.value).map(|value| Versioned::new(value, doc.version))))
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get_game(&self, id: &GameId) -> StoreResult<Option<Versioned<GameDocument>>> {
        self.read(&DocKey::Game(id.clone()), |doc| match doc {
            Document::Game(game) => Some(game.clone()),
            _ => None,
        })
    }

    async fn get_state(&self, id: &GameId) -> StoreResult<Option<Versioned<GameState>>> {
        self.read(&DocKey::State(id.clone()), |doc| match doc {
            Document::State(_, state) => Some(state.clone()),
            _ => None,
        })
    }

    async fn get_chunks(&self, ids: &[ChunkId]) -> StoreResult<Vec<Option<Versioned<ActionChunk>>>> {
        ids.iter()
            .map(|id| {
                self.read(&DocKey::Chunk(id.clone()), |doc| match doc {
                    Document::Chunk(chunk) => Some(chunk.clone()),
                    _ => None,
                })
            })
            .collect()
    }

    async fn query_games(&self, query: &GameQuery) -> StoreResult<Vec<GameId>> {
        self.check_available()?;
        let inner = self
            .inner
            .read()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))?;
        let mut ids: Vec<GameId> = inner
            .documents
            .values()
            .filter_map(|doc| match &doc.value {
                Document::Game(game) if query.matches(game) => Some(game.id.clone()),
                _ => None,
            })
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        self.check_available()?;
        let mut inner = self
            .inner
            .write()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))?;

        for (key, expected) in &batch.preconditions {
            let current = inner.documents.get(key).map(|doc| doc.version);
            if current != *expected {
                return Err(StoreError::Conflict { key: key.to_string() });
            }
        }

        for key in batch.deletes {
            inner.documents.remove(&key);
        }
        for document in batch.puts {
            inner.last_version += 1;
            let version = inner.last_version;
            inner.documents.insert(document.key(), Versioned::new(document, version));
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
