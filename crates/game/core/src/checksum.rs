//! Order-sensitive, self-inverse checksum over a game's action log.
//!
//! Each `(index, id)` pair contributes a stable 64-bit hash, and the fold is
//! XOR. Because the index is hashed together with the id, placing a
//! different action at an index changes the checksum; because XOR is its own
//! inverse, folding an undone range a second time removes it exactly.
//!
//! The per-pair hash is the first eight bytes (big-endian) of
//! `SHA-256(index as u64 BE || id bytes)`.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::action::Action;
use crate::ids::ActionId;

/// Running checksum of a game's action log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionChecksum(pub u64);

impl ActionChecksum {
    pub const EMPTY: Self = Self(0);

    /// Folds one `(index, id)` pair in or out of the checksum.
    pub fn fold(self, index: u64, id: &ActionId) -> Self {
        Self(self.0 ^ entry_hash(index, id))
    }

    pub fn fold_action(self, action: &Action) -> Self {
        self.fold(action.index, &action.id)
    }

    /// Folds every action of `actions` into the checksum.
    pub fn fold_actions<'a>(self, actions: impl IntoIterator<Item = &'a Action>) -> Self {
        actions
            .into_iter()
            .fold(self, |checksum, action| checksum.fold_action(action))
    }

    /// Checksum of a complete log given in index order.
    pub fn of_log<'a>(actions: impl IntoIterator<Item = &'a Action>) -> Self {
        Self::EMPTY.fold_actions(actions)
    }

    /// Removes `undone` (walked newest first) and adds `redone`.
    pub fn undo_redo(self, undone: &[Action], redone: &[Action]) -> Self {
        self.fold_actions(undone.iter().rev()).fold_actions(redone)
    }
}

impl fmt::Display for ActionChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0.to_be_bytes()))
    }
}

fn entry_hash(index: u64, id: &ActionId) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(index.to_be_bytes());
    hasher.update(id.as_str().as_bytes());
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;

    fn log(ids: &[&str]) -> Vec<Action> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| Action::user(*id, "g", "p", "note", Value::Null).at_index(i as u64))
            .collect()
    }

    #[test]
    fn fold_is_self_inverse() {
        let actions = log(&["a", "b", "c"]);
        let full = ActionChecksum::of_log(&actions);
        let back = full.fold_actions(actions.iter().rev());
        assert_eq!(back, ActionChecksum::EMPTY);
    }

    #[test]
    fn fold_is_order_sensitive() {
        let forward = ActionChecksum::of_log(&log(&["a", "b"]));
        let swapped = ActionChecksum::of_log(&log(&["b", "a"]));
        assert_ne!(forward, swapped);
    }

    #[test]
    fn undo_then_redo_matches_direct_log() {
        let original = log(&["a", "b", "c", "d"]);
        let checksum = ActionChecksum::of_log(&original);

        // Undo c and d, then redo d as a new action at index 2.
        let undone = &original[2..];
        let redone = vec![original[3].redo_for(&original[2].id).at_index(2)];
        let after = checksum.undo_redo(undone, &redone);

        let mut expected_log = original[..2].to_vec();
        expected_log.extend(redone);
        assert_eq!(after, ActionChecksum::of_log(&expected_log));
    }

    #[test]
    fn displays_as_sixteen_hex_digits() {
        let checksum = ActionChecksum::of_log(&log(&["a"]));
        let text = checksum.to_string();
        assert_eq!(text.len(), 16);
        assert!(text.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
