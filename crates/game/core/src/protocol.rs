//! Request/response contract between the client replica and the server.

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::action::Action;
use crate::checksum::ActionChecksum;
use crate::ids::{ActionId, GameId, PlayerId};
use crate::state::{GameDocument, GameState};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub game_id: GameId,
    /// `index` carries the tail the client believed in when submitting.
    pub action: Action,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// Canonical actions committed for the submission, in index order.
    pub actions: Vec<Action>,
    /// Already-stored actions the client had not seen, which must be placed
    /// before `actions`.
    #[serde(default)]
    pub missing_actions: Vec<Action>,
    pub checksum: ActionChecksum,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UndoRequest {
    pub game_id: GameId,
    pub action_id: ActionId,
    pub player_id: PlayerId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UndoResponse {
    pub undone_actions: Vec<Action>,
    pub redone_actions: Vec<Action>,
    pub checksum: ActionChecksum,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub game_id: GameId,
    pub checksum: ActionChecksum,
    /// Index of the client's last action, `None` for an empty log.
    pub tail_index: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    InSync,
    OutOfSync,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub status: SyncStatus,
    /// The server's most recent actions when out of sync, in index order.
    pub actions: Vec<Action>,
    pub checksum: ActionChecksum,
}

/// Full game snapshot as served to clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameView {
    pub document: GameDocument,
    pub state: GameState,
}

/// Server-pushed change notification for one game.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Push {
    Appended {
        game_id: GameId,
        actions: Vec<Action>,
    },
    Undone {
        game_id: GameId,
        undone_action: Action,
        redone_actions: Vec<Action>,
        /// Every removed action, target first.
        undone_actions: Vec<Action>,
    },
}

impl Push {
    pub fn game_id(&self) -> &GameId {
        match self {
            Push::Appended { game_id, .. } | Push::Undone { game_id, .. } => game_id,
        }
    }
}
