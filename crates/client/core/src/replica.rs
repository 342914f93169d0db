//! Local copy of one game's log and the state it folds to.

use game_core::{
    Action, ActionChecksum, ActionId, Game, GameEngine, GameRules, GameView, RunOutcome,
    UndoError, UndoPlan, ValidationError, apply_undo,
};

use crate::error::{Result, SyncError};

/// A game plus the full action log that produced its state.
///
/// `game.state.action_count == log.len()` and the state checksum equals the
/// fold of `log` at all times.
#[derive(Clone, Debug, PartialEq)]
pub struct Replica {
    game: Game,
    log: Vec<Action>,
}

impl Replica {
    /// Adopts a server snapshot, refusing one whose log does not fold to its
    /// reported checksum.
    pub fn new(view: GameView, log: Vec<Action>) -> Result<Self> {
        let found = ActionChecksum::of_log(&log);
        let expected = view.state.action_checksum;
        if found != expected || log.len() as u64 != view.state.action_count {
            return Err(SyncError::Desync { expected, found });
        }
        Ok(Self {
            game: Game::new(view.document, view.state),
            log,
        })
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    pub fn log(&self) -> &[Action] {
        &self.log
    }

    pub fn count(&self) -> u64 {
        self.game.state.action_count
    }

    pub fn tail_index(&self) -> Option<u64> {
        self.count().checked_sub(1)
    }

    pub fn checksum(&self) -> ActionChecksum {
        self.game.state.action_checksum
    }

    /// Checksum folded from the log itself rather than read from the state.
    pub fn recomputed_checksum(&self) -> ActionChecksum {
        ActionChecksum::of_log(&self.log)
    }

    pub fn action_at(&self, index: u64) -> Option<&Action> {
        self.log.get(usize::try_from(index).ok()?)
    }

    pub fn find(&self, id: &ActionId) -> Option<&Action> {
        self.log.iter().rev().find(|action| &action.id == id)
    }

    /// Adopts an optimistic run computed against this replica.
    pub fn accept(&mut self, outcome: RunOutcome) {
        self.game.state = outcome.updated_state;
        self.log.extend(outcome.processed_actions);
    }

    /// Applies one canonical action at the tail.
    pub fn apply(&mut self, rules: &dyn GameRules, action: &Action) -> std::result::Result<(), ValidationError> {
        let applied = GameEngine::new(rules, &mut self.game).apply(action)?;
        self.log.push(applied);
        Ok(())
    }

    pub fn apply_all<'a>(
        &mut self,
        rules: &dyn GameRules,
        actions: impl IntoIterator<Item = &'a Action>,
    ) -> std::result::Result<(), ValidationError> {
        for action in actions {
            self.apply(rules, action)?;
        }
        Ok(())
    }

    /// Reverses actions from the tail until `len` remain; returns them in
    /// index order.
    pub fn truncate(&mut self, rules: &dyn GameRules, len: u64) -> std::result::Result<Vec<Action>, ValidationError> {
        let mut removed = Vec::new();
        while self.count() > len {
            let Some(tail) = self.log.last().cloned() else {
                break;
            };
            GameEngine::new(rules, &mut self.game).undo(&tail)?;
            self.log.pop();
            removed.push(tail);
        }
        removed.reverse();
        Ok(removed)
    }

    /// Performs `plan` locally and returns the indexed redo actions.
    ///
    /// Leaves the replica untouched on error.
    pub fn undo(&mut self, rules: &dyn GameRules, plan: &UndoPlan) -> std::result::Result<Vec<Action>, UndoError> {
        let mut game = self.game.clone();
        let redone = apply_undo(rules, &mut game, plan)?;
        let keep = usize::try_from(plan.target.index).unwrap_or(usize::MAX);
        self.log.truncate(keep);
        self.log.extend(redone.iter().cloned());
        self.game = game;
        Ok(redone)
    }
}

#[cfg(test)]
mod tests {
    use game_content::SealedRoundRules;
    use game_core::{GameDocument, PlayerId, plan_undo};

    use super::*;

    fn players() -> Vec<PlayerId> {
        vec![PlayerId::new("alice"), PlayerId::new("bob")]
    }

    fn empty() -> Replica {
        let document = GameDocument::new("g1", "sealed-round", players());
        let view = GameView {
            document,
            state: SealedRoundRules::initial_state(&players()),
        };
        Replica::new(view, Vec::new()).unwrap()
    }

    fn with_notes(rules: &SealedRoundRules, n: usize) -> Replica {
        let mut replica = empty();
        for i in 0..n {
            let note = SealedRoundRules::note(replica.game(), &format!("n{i}"), &players()[0], "hi");
            replica.apply(rules, &note).unwrap();
        }
        replica
    }

    #[test]
    fn truncate_reverses_tail_actions() {
        let rules = SealedRoundRules::default();
        let mut replica = with_notes(&rules, 4);
        let before = with_notes(&rules, 2);

        let removed = replica.truncate(&rules, 2).unwrap();

        assert_eq!(removed.iter().map(|a| a.index).collect::<Vec<_>>(), [2, 3]);
        assert_eq!(replica, before);
        assert_eq!(replica.checksum(), replica.recomputed_checksum());
    }

    #[test]
    fn snapshot_with_wrong_checksum_is_refused() {
        let rules = SealedRoundRules::default();
        let replica = with_notes(&rules, 3);
        let view = GameView {
            document: replica.game().document.clone(),
            state: replica.game().state.clone(),
        };
        let short = replica.log()[..2].to_vec();
        assert!(matches!(Replica::new(view, short), Err(SyncError::Desync { .. })));
    }

    #[test]
    fn local_undo_keeps_state_and_log_aligned() {
        let rules = SealedRoundRules::default();
        let mut replica = with_notes(&rules, 1);
        let note = SealedRoundRules::note(replica.game(), "a1", &players()[0], "oops");
        replica.apply(&rules, &note).unwrap();

        let plan = plan_undo(replica.log(), &ActionId::new("a1"), &players()[0]).unwrap();
        let redone = replica.undo(&rules, &plan).unwrap();

        assert!(redone.is_empty());
        assert_eq!(replica.count(), 1);
        assert_eq!(replica.checksum(), replica.recomputed_checksum());
    }
}
