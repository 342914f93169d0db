//! Validation errors raised by rule sets and the engine reducer.

use thiserror::Error;

use crate::ids::{ActionId, GameId, PlayerId};

/// The action is not legal against the current game.
///
/// Fatal to that action only: the server rejects it and the client rolls it
/// back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("action {action} targets game {found}, expected {expected}")]
    WrongGame {
        action: ActionId,
        expected: GameId,
        found: GameId,
    },

    #[error("player {player} is not seated in this game")]
    UnknownPlayer { player: PlayerId },

    #[error("player {player} cannot act now")]
    NotActive { player: PlayerId },

    #[error("game is already finished")]
    GameFinished,

    #[error("unknown action type {kind}")]
    UnknownActionType { kind: String },

    #[error("invalid payload for {kind}: {reason}")]
    InvalidPayload { kind: String, reason: String },

    #[error("illegal action: {reason}")]
    Illegal { reason: String },

    #[error("action {action} at index {index} is not the log tail ({count} actions)")]
    NotTail {
        action: ActionId,
        index: u64,
        count: u64,
    },

    #[error("action {action} produced more than {limit} follow-up actions")]
    RunawayFollowUps { action: ActionId, limit: usize },
}

impl ValidationError {
    pub fn illegal(reason: impl Into<String>) -> Self {
        Self::Illegal {
            reason: reason.into(),
        }
    }

    pub fn invalid_payload(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            kind: kind.into(),
            reason: reason.into(),
        }
    }
}
