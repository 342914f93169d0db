//! Game document and derived state snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

use crate::checksum::ActionChecksum;
use crate::ids::{GameId, PlayerId, TitleId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    /// Waiting for players to join.
    Open,
    Active,
    Finished,
}

/// Lobby/listing level description of a game.
///
/// Everything here is auxiliary to the action log; it is mutated only by
/// store transactions together with the log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameDocument {
    pub id: GameId,
    pub title_id: TitleId,
    pub player_ids: Vec<PlayerId>,
    pub status: GameStatus,
    pub public: bool,
    /// Bumped on every committed mutation.
    pub etag: u64,
    pub updated_at: DateTime<Utc>,
}

impl GameDocument {
    pub fn new(id: impl Into<GameId>, title_id: impl Into<TitleId>, player_ids: Vec<PlayerId>) -> Self {
        Self {
            id: id.into(),
            title_id: title_id.into(),
            player_ids,
            status: GameStatus::Active,
            public: false,
            etag: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: GameStatus) -> Self {
        self.status = status;
        self
    }

    pub fn public(mut self) -> Self {
        self.public = true;
        self
    }

    pub fn has_player(&self, player: &PlayerId) -> bool {
        self.player_ids.contains(player)
    }
}

/// Final outcome of a finished game.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameResult {
    pub winners: Vec<PlayerId>,
    pub summary: String,
}

/// Derived snapshot of a game after applying its whole log.
///
/// `action_count` and `action_checksum` are maintained by
/// [`crate::GameEngine`]; `board` is owned by the rule set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    pub action_count: u64,
    pub action_checksum: ActionChecksum,
    pub active_player_ids: Vec<PlayerId>,
    pub result: Option<GameResult>,
    pub board: Value,
}

impl GameState {
    pub fn new(active_player_ids: Vec<PlayerId>, board: Value) -> Self {
        Self {
            action_count: 0,
            action_checksum: ActionChecksum::EMPTY,
            active_player_ids,
            result: None,
            board,
        }
    }

    /// Index the next appended action will receive.
    pub fn next_index(&self) -> u64 {
        self.action_count
    }

    pub fn is_finished(&self) -> bool {
        self.result.is_some()
    }
}

/// A game document together with its current state; what the rules see.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub document: GameDocument,
    pub state: GameState,
}

impl Game {
    pub fn new(document: GameDocument, state: GameState) -> Self {
        Self { document, state }
    }

    pub fn id(&self) -> &GameId {
        &self.document.id
    }
}
