use serde::{Deserialize, Serialize};
use strum::Display;

use game_core::{ActionId, GameId};

/// User-visible events raised while keeping a replica in sync.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    /// A submitted action or undo was refused and rolled back.
    ActionRejected { action_id: ActionId, reason: String },

    /// The local log was repaired. `kept` actions survived; a full refetch
    /// keeps none.
    Resynced { game_id: GameId, kept: u64, full: bool },

    ConnectionProblem { reason: String },
}
