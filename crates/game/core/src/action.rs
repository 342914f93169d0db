//! The indexed, append-only unit of a game's log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

use crate::ids::{ActionId, GameId, GroupId, PlayerId};

/// Separator used by [`derive_redo_id`].
pub const REDO_MARKER: &str = "-REDO-";

/// Who produced an action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ActionSource {
    /// Submitted by a player.
    User,
    /// Synthesized by the rules engine or by undo (redo actions).
    System,
}

/// One atomic, indexed state-transition request of a game.
///
/// Indices are unique and contiguous from 0 within a game. The server is the
/// only authority that assigns them; a client's index is only its belief
/// about the tail at submission time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    pub game_id: GameId,
    pub index: u64,
    pub player_id: Option<PlayerId>,
    /// Rule-set specific action type, e.g. `"play"`.
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
    pub source: ActionSource,
    pub simultaneous_group_id: Option<GroupId>,
    /// True if applying this action discloses hidden information.
    pub reveals_info: bool,
    /// Data the rules need to reverse this action. Filled by the engine.
    pub undo_patch: Value,
    pub created_at: DateTime<Utc>,
}

impl Action {
    /// Creates a user action with an empty undo patch and index 0.
    pub fn user(
        id: impl Into<ActionId>,
        game_id: impl Into<GameId>,
        player_id: impl Into<PlayerId>,
        kind: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: id.into(),
            game_id: game_id.into(),
            index: 0,
            player_id: Some(player_id.into()),
            kind: kind.into(),
            payload,
            source: ActionSource::User,
            simultaneous_group_id: None,
            reveals_info: false,
            undo_patch: Value::Null,
            created_at: Utc::now(),
        }
    }

    /// Creates a system action not attributed to any player.
    pub fn system(
        id: impl Into<ActionId>,
        game_id: impl Into<GameId>,
        kind: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: id.into(),
            game_id: game_id.into(),
            index: 0,
            player_id: None,
            kind: kind.into(),
            payload,
            source: ActionSource::System,
            simultaneous_group_id: None,
            reveals_info: false,
            undo_patch: Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn at_index(mut self, index: u64) -> Self {
        self.index = index;
        self
    }

    pub fn in_group(mut self, group: impl Into<GroupId>) -> Self {
        self.simultaneous_group_id = Some(group.into());
        self
    }

    pub fn revealing(mut self) -> Self {
        self.reveals_info = true;
        self
    }

    pub fn is_by(&self, player: &PlayerId) -> bool {
        self.player_id.as_ref() == Some(player)
    }

    pub fn shares_group_with(&self, other: &Action) -> bool {
        match (&self.simultaneous_group_id, &other.simultaneous_group_id) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Builds the compensating action that re-applies `self` after the log
    /// was undone back to `undo_target`.
    ///
    /// Client and server produce identical redo actions independently: the
    /// id comes from [`derive_redo_id`] and every other field is copied.
    pub fn redo_for(&self, undo_target: &ActionId) -> Action {
        Action {
            id: derive_redo_id(&self.id, undo_target),
            undo_patch: Value::Null,
            ..self.clone()
        }
    }
}

/// Deterministic id of the redo action re-applying `original` after an undo
/// targeting `undo_target`.
pub fn derive_redo_id(original: &ActionId, undo_target: &ActionId) -> ActionId {
    ActionId(format!("{}{}{}", original, REDO_MARKER, undo_target))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn redo_id_is_pure() {
        let a = derive_redo_id(&ActionId::new("b-3"), &ActionId::new("a-3"));
        let b = derive_redo_id(&ActionId::new("b-3"), &ActionId::new("a-3"));
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "b-3-REDO-a-3");
    }

    #[test]
    fn redo_action_keeps_payload_and_group() {
        let original = Action::user("b-3", "g", "bob", "play", json!({"choice": 2}))
            .in_group("round-1")
            .at_index(4);
        let redo = original.redo_for(&ActionId::new("a-3"));

        assert_eq!(redo.id.as_str(), "b-3-REDO-a-3");
        assert_eq!(redo.payload, original.payload);
        assert!(redo.shares_group_with(&original));
        assert_eq!(redo.player_id, original.player_id);
    }

    #[test]
    fn ungrouped_actions_never_share_group() {
        let a = Action::user("a", "g", "alice", "note", Value::Null);
        let b = Action::user("b", "g", "bob", "note", Value::Null);
        assert!(!a.shares_group_with(&b));
    }

    #[test]
    fn source_serializes_snake_case() {
        assert_eq!(ActionSource::System.to_string(), "system");
        assert_eq!(
            serde_json::to_string(&ActionSource::User).unwrap(),
            "\"user\""
        );
    }
}
