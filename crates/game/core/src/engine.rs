//! Deterministic reducer shared by the server and the client replica.
//!
//! A rule set ([`GameRules`]) only knows how to move the board forward and
//! back. [`GameEngine`] wraps it and owns the log bookkeeping: it assigns
//! indices from the current `action_count`, folds the checksum, runs
//! synthesized follow-up actions, and reverses exactly that on undo. Because
//! both sides run the same reducer, a client can predict the server's
//! `processed_actions` and resulting checksum.

use std::collections::VecDeque;

use serde_json::Value;

use crate::action::Action;
use crate::error::ValidationError;
use crate::ids::TitleId;
use crate::state::{Game, GameState};

/// Upper bound on actions produced by one submitted action.
pub const MAX_FOLLOW_UPS: usize = 64;

/// What a rule set returns for one action.
#[derive(Clone, Debug, PartialEq)]
pub struct RuleOutcome {
    /// State after the action. `action_count` and `action_checksum` are
    /// overwritten by the engine.
    pub state: GameState,
    /// Data the rules need to reverse the action later.
    pub undo_patch: Value,
    /// System actions to run right after this one, in order.
    pub follow_ups: Vec<Action>,
}

impl RuleOutcome {
    pub fn new(state: GameState, undo_patch: Value) -> Self {
        Self {
            state,
            undo_patch,
            follow_ups: Vec::new(),
        }
    }

    pub fn with_follow_up(mut self, action: Action) -> Self {
        self.follow_ups.push(action);
        self
    }
}

/// Game-specific legality and board logic. Pure and deterministic.
pub trait GameRules: Send + Sync {
    fn title(&self) -> TitleId;

    /// Validates and applies `action` to `game`.
    fn run(&self, action: &Action, game: &Game) -> Result<RuleOutcome, ValidationError>;

    /// Reverses `action`, which is the last action applied to `game`.
    fn undo_action(&self, game: &Game, action: &Action) -> Result<GameState, ValidationError>;
}

/// Result of running one submitted action through the engine.
#[derive(Clone, Debug, PartialEq)]
pub struct RunOutcome {
    /// The submitted action followed by any synthesized actions, indexed.
    pub processed_actions: Vec<Action>,
    pub updated_state: GameState,
    /// Index assigned to the first processed action.
    pub index_offset: u64,
}

impl RunOutcome {
    pub fn reveals_info(&self) -> bool {
        self.processed_actions.iter().any(|action| action.reveals_info)
    }
}

/// Reducer over a mutable [`Game`].
pub struct GameEngine<'a, R: GameRules + ?Sized> {
    rules: &'a R,
    game: &'a mut Game,
}

impl<'a, R: GameRules + ?Sized> GameEngine<'a, R> {
    pub fn new(rules: &'a R, game: &'a mut Game) -> Self {
        Self { rules, game }
    }

    /// Runs a newly submitted action and every follow-up it triggers.
    ///
    /// On error the game is left untouched.
    pub fn execute(&mut self, action: &Action) -> Result<RunOutcome, ValidationError> {
        let outcome = run(self.rules, action, self.game)?;
        self.game.state = outcome.updated_state.clone();
        Ok(outcome)
    }

    /// Applies one already-indexed action from the canonical log.
    ///
    /// Follow-ups are not run: the canonical log already contains them.
    pub fn apply(&mut self, action: &Action) -> Result<Action, ValidationError> {
        if action.index != self.game.state.action_count {
            return Err(ValidationError::NotTail {
                action: action.id.clone(),
                index: action.index,
                count: self.game.state.action_count,
            });
        }
        let (applied, state, _) = step(self.rules, action.clone(), self.game)?;
        self.game.state = state;
        Ok(applied)
    }

    /// Reverses the tail action.
    pub fn undo(&mut self, action: &Action) -> Result<(), ValidationError> {
        let count = self.game.state.action_count;
        if count == 0 || action.index != count - 1 {
            return Err(ValidationError::NotTail {
                action: action.id.clone(),
                index: action.index,
                count,
            });
        }
        let mut state = self.rules.undo_action(self.game, action)?;
        state.action_count = count - 1;
        state.action_checksum = self.game.state.action_checksum.fold_action(action);
        self.game.state = state;
        Ok(())
    }
}

/// Runs `action` against `game` without mutating it.
pub fn run<R: GameRules + ?Sized>(
    rules: &R,
    action: &Action,
    game: &Game,
) -> Result<RunOutcome, ValidationError> {
    if action.game_id != game.document.id {
        return Err(ValidationError::WrongGame {
            action: action.id.clone(),
            expected: game.document.id.clone(),
            found: action.game_id.clone(),
        });
    }
    if game.state.is_finished() {
        return Err(ValidationError::GameFinished);
    }

    let index_offset = game.state.action_count;
    let mut working = game.clone();
    let mut processed = Vec::new();
    let mut pending = VecDeque::from([action.clone()]);

    while let Some(mut next) = pending.pop_front() {
        if processed.len() > MAX_FOLLOW_UPS {
            return Err(ValidationError::RunawayFollowUps {
                action: action.id.clone(),
                limit: MAX_FOLLOW_UPS,
            });
        }
        next.index = working.state.action_count;
        let (applied, state, follow_ups) = step(rules, next, &working)?;
        working.state = state;
        pending.extend(follow_ups);
        processed.push(applied);
    }

    Ok(RunOutcome {
        processed_actions: processed,
        updated_state: working.state,
        index_offset,
    })
}

fn step<R: GameRules + ?Sized>(
    rules: &R,
    mut action: Action,
    game: &Game,
) -> Result<(Action, GameState, Vec<Action>), ValidationError> {
    let outcome = rules.run(&action, game)?;
    action.undo_patch = outcome.undo_patch;

    let mut state = outcome.state;
    state.action_count = game.state.action_count + 1;
    state.action_checksum = game.state.action_checksum.fold_action(&action);
    Ok((action, state, outcome.follow_ups))
}
