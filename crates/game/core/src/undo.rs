//! Undo planning shared by the server and the client replica.
//!
//! Undoing an action removes it and every later action from the log. Later
//! actions may only be removed if they belong to the acting player or to the
//! target's simultaneous group; other players' actions of that group are
//! re-applied afterwards as redo actions with deterministic ids.

use thiserror::Error;

use crate::action::Action;
use crate::engine::{GameEngine, GameRules};
use crate::error::ValidationError;
use crate::ids::{ActionId, PlayerId};
use crate::state::Game;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UndoError {
    #[error("action {0} is not in the log")]
    TargetNotFound(ActionId),

    #[error("action {action} does not belong to {player}")]
    NotOwnAction { action: ActionId, player: PlayerId },

    #[error("action {blocking} by another player follows the undo target")]
    BlockedBy { blocking: ActionId },

    #[error("action {action} revealed hidden information")]
    RevealsInfo { action: ActionId },

    #[error("undo inside group of {players} players would redo actions of other players")]
    PartialGroupOverlap { players: usize },

    #[error(transparent)]
    Rules(#[from] ValidationError),
}

/// The log change an undo performs.
#[derive(Clone, Debug, PartialEq)]
pub struct UndoPlan {
    pub target: Action,
    /// Removed suffix, in index order (target first).
    pub undone: Vec<Action>,
    /// Compensating actions, not yet indexed, in application order.
    pub redone: Vec<Action>,
}

/// Plans undoing `target` on behalf of `player`.
///
/// `log` must be in index order, end at the log tail, and contain every
/// member of the target's simultaneous group.
pub fn plan_undo(log: &[Action], target: &ActionId, player: &PlayerId) -> Result<UndoPlan, UndoError> {
    let position = log
        .iter()
        .rposition(|action| &action.id == target)
        .ok_or_else(|| UndoError::TargetNotFound(target.clone()))?;
    let target_action = &log[position];

    if !target_action.is_by(player) {
        return Err(UndoError::NotOwnAction {
            action: target.clone(),
            player: player.clone(),
        });
    }

    let undone = log[position..].to_vec();
    let mut redone = Vec::new();
    for action in &undone {
        if action.reveals_info {
            return Err(UndoError::RevealsInfo {
                action: action.id.clone(),
            });
        }
        if action.is_by(player) {
            continue;
        }
        if !action.shares_group_with(target_action) {
            return Err(UndoError::BlockedBy {
                blocking: action.id.clone(),
            });
        }
        redone.push(action.redo_for(target));
    }

    if !redone.is_empty() {
        let players = group_players(log, target_action);
        if players > 2 {
            return Err(UndoError::PartialGroupOverlap { players });
        }
    }

    Ok(UndoPlan {
        target: target_action.clone(),
        undone,
        redone,
    })
}

/// Applies `plan` to `game`: reverses the undone suffix newest first, then
/// runs the redo actions. Returns the redo actions as they were indexed and
/// processed, including any follow-ups they triggered.
pub fn apply_undo<R: GameRules + ?Sized>(
    rules: &R,
    game: &mut Game,
    plan: &UndoPlan,
) -> Result<Vec<Action>, UndoError> {
    let mut engine = GameEngine::new(rules, game);
    for action in plan.undone.iter().rev() {
        engine.undo(action)?;
    }
    let mut processed = Vec::new();
    for action in &plan.redone {
        processed.extend(engine.execute(action)?.processed_actions);
    }
    Ok(processed)
}

fn group_players(log: &[Action], target: &Action) -> usize {
    let mut players: Vec<&PlayerId> = log
        .iter()
        .filter(|action| action.shares_group_with(target))
        .filter_map(|action| action.player_id.as_ref())
        .collect();
    players.sort();
    players.dedup();
    players.len()
}
