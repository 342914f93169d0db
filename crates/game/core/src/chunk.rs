//! Index partitioning of a game's action log into fixed-capacity chunks.
//!
//! Chunk `n` of a game covers indices `[n * chunk_size, (n + 1) * chunk_size)`.
//! A chunk is always gap free: its actions are exactly
//! `start_index..end_index` in order, and `end_index` is exclusive. Every
//! append and every removal re-checks that invariant.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::action::Action;
use crate::ids::{ChunkId, GameId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    #[error("chunk size must be at least 1")]
    ZeroChunkSize,

    #[error("action {index} belongs to game {found}, chunk {chunk} belongs to {expected}")]
    WrongGame {
        chunk: ChunkId,
        expected: GameId,
        found: GameId,
        index: u64,
    },

    #[error("chunk {chunk} ends at {end_index}, cannot append action {index}")]
    Gap {
        chunk: ChunkId,
        end_index: u64,
        index: u64,
    },

    #[error("chunk {chunk} is full ({capacity} actions)")]
    Full { chunk: ChunkId, capacity: u64 },

    #[error("index {index} is outside chunk {chunk} [{start_index}, {end_index})")]
    OutOfRange {
        chunk: ChunkId,
        start_index: u64,
        end_index: u64,
        index: u64,
    },

    #[error("chunk {chunk} is not contiguous at position {position}")]
    NotContiguous { chunk: ChunkId, position: u64 },
}

/// Chunk number holding `index`.
pub fn chunk_number(index: u64, chunk_size: u64) -> u64 {
    index / chunk_size
}

/// Minimal ordered set of chunk ids covering `[start, end)`.
pub fn chunk_ids_for_range(game_id: &GameId, start: u64, end: u64, chunk_size: u64) -> Vec<ChunkId> {
    if start >= end || chunk_size == 0 {
        return Vec::new();
    }
    let first = chunk_number(start, chunk_size);
    let last = chunk_number(end - 1, chunk_size);
    (first..=last)
        .map(|number| ChunkId::new(game_id.clone(), number))
        .collect()
}

/// A contiguous, fixed-capacity slice of one game's action log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionChunk {
    pub id: ChunkId,
    pub game_id: GameId,
    pub start_index: u64,
    /// Exclusive.
    pub end_index: u64,
    pub actions: Vec<Action>,
}

impl ActionChunk {
    /// Creates the empty chunk with the given number.
    pub fn empty(game_id: GameId, number: u64, chunk_size: u64) -> Self {
        let start_index = number * chunk_size;
        Self {
            id: ChunkId::new(game_id.clone(), number),
            game_id,
            start_index,
            end_index: start_index,
            actions: Vec::new(),
        }
    }

    pub fn len(&self) -> u64 {
        self.end_index - self.start_index
    }

    pub fn is_empty(&self) -> bool {
        self.end_index == self.start_index
    }

    pub fn is_full(&self, chunk_size: u64) -> bool {
        self.len() >= chunk_size
    }

    /// Appends `action`, which must carry exactly `end_index`.
    pub fn push(&mut self, action: Action, chunk_size: u64) -> Result<(), ChunkError> {
        if action.game_id != self.game_id {
            return Err(ChunkError::WrongGame {
                chunk: self.id.clone(),
                expected: self.game_id.clone(),
                found: action.game_id.clone(),
                index: action.index,
            });
        }
        if action.index != self.end_index {
            return Err(ChunkError::Gap {
                chunk: self.id.clone(),
                end_index: self.end_index,
                index: action.index,
            });
        }
        if self.is_full(chunk_size) {
            return Err(ChunkError::Full {
                chunk: self.id.clone(),
                capacity: chunk_size,
            });
        }
        self.actions.push(action);
        self.end_index += 1;
        self.assert_contiguous()
    }

    /// Splices out every action at or after `index` and shrinks `end_index`.
    ///
    /// Returns the removed actions in index order.
    pub fn remove_from(&mut self, index: u64) -> Result<Vec<Action>, ChunkError> {
        if index < self.start_index || index > self.end_index {
            return Err(ChunkError::OutOfRange {
                chunk: self.id.clone(),
                start_index: self.start_index,
                end_index: self.end_index,
                index,
            });
        }
        let keep = (index - self.start_index) as usize;
        let removed = self.actions.split_off(keep);
        self.end_index = index;
        self.assert_contiguous()?;
        Ok(removed)
    }

    /// Verifies the actions are exactly `start_index..end_index`, in order.
    pub fn assert_contiguous(&self) -> Result<(), ChunkError> {
        if self.actions.len() as u64 != self.len() {
            return Err(ChunkError::NotContiguous {
                chunk: self.id.clone(),
                position: self.actions.len() as u64,
            });
        }
        for (offset, action) in self.actions.iter().enumerate() {
            if action.index != self.start_index + offset as u64 || action.game_id != self.game_id {
                return Err(ChunkError::NotContiguous {
                    chunk: self.id.clone(),
                    position: offset as u64,
                });
            }
        }
        Ok(())
    }

    /// Actions of this chunk inside `[start, end)`.
    pub fn actions_in_range(&self, start: u64, end: u64) -> impl Iterator<Item = &Action> {
        self.actions
            .iter()
            .filter(move |action| action.index >= start && action.index < end)
    }
}

/// Distributes `actions` (already indexed, contiguous, starting at the log
/// tail) over the tail chunk and as many new chunks as needed.
///
/// `tail` must be the chunk holding the current tail when the log does not
/// end on a chunk boundary, and `None` otherwise. Returns every chunk that
/// was created or modified.
pub fn append_to_chunks(
    game_id: &GameId,
    tail: Option<ActionChunk>,
    actions: Vec<Action>,
    chunk_size: u64,
) -> Result<Vec<ActionChunk>, ChunkError> {
    if chunk_size == 0 {
        return Err(ChunkError::ZeroChunkSize);
    }
    let mut touched: Vec<ActionChunk> = Vec::new();
    let mut current = tail;

    for action in actions {
        let number = chunk_number(action.index, chunk_size);
        let needs_new = match &current {
            Some(chunk) => chunk.id.number != number,
            None => true,
        };
        if needs_new {
            if let Some(done) = current.take() {
                touched.push(done);
            }
            current = Some(ActionChunk::empty(game_id.clone(), number, chunk_size));
        }
        if let Some(chunk) = current.as_mut() {
            chunk.push(action, chunk_size)?;
        }
    }

    if let Some(done) = current {
        touched.push(done);
    }
    Ok(touched)
}
