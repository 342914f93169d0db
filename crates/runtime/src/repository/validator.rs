//! Caller-supplied checks run inside log store transactions.
//!
//! The store re-reads the game right before committing and hands the fresh
//! documents to the validator, which decides whether the write still makes
//! sense and which auxiliary game fields change with it.

use chrono::Utc;

use game_core::{Action, GameDocument, GameState, GameStatus, GroupId};

use crate::api::RuntimeError;

/// Auxiliary change to the game document committed together with the log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GameUpdate {
    SetStatus(GameStatus),
    SetPublic(bool),
    /// Only bump `updated_at`.
    Touch,
}

impl GameUpdate {
    pub fn apply(&self, game: &mut GameDocument) {
        match self {
            GameUpdate::SetStatus(status) => game.status = *status,
            GameUpdate::SetPublic(public) => game.public = *public,
            GameUpdate::Touch => {}
        }
        game.updated_at = Utc::now();
    }
}

/// Request to include stored actions the submitter had not seen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MissingActions {
    /// Number of stored actions right before the current tail.
    pub count: u64,
    /// Group every one of them must belong to.
    pub group_id: GroupId,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AppendPlan {
    pub game_updates: Vec<GameUpdate>,
    pub missing_actions: Option<MissingActions>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AppendDecision {
    /// Leave the log untouched.
    Cancel,
    Proceed(AppendPlan),
}

impl AppendDecision {
    pub fn proceed() -> Self {
        AppendDecision::Proceed(AppendPlan::default())
    }
}

/// What an append validator gets to see.
#[derive(Debug)]
pub struct AppendContext<'a> {
    pub game: &'a GameDocument,
    /// Stored state before the append.
    pub state: &'a GameState,
    /// State the caller computed for after the append.
    pub new_state: &'a GameState,
    /// Actions as proposed by the caller, before index assignment.
    pub actions: &'a [Action],
}

pub trait AppendValidator: Send + Sync {
    fn validate(&self, ctx: &AppendContext<'_>) -> Result<AppendDecision, RuntimeError>;
}

impl<F> AppendValidator for F
where
    F: Fn(&AppendContext<'_>) -> Result<AppendDecision, RuntimeError> + Send + Sync,
{
    fn validate(&self, ctx: &AppendContext<'_>) -> Result<AppendDecision, RuntimeError> {
        self(ctx)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UndoDecision {
    Cancel,
    Proceed(Vec<GameUpdate>),
}

#[derive(Debug)]
pub struct UndoContext<'a> {
    pub game: &'a GameDocument,
    pub state: &'a GameState,
    pub new_state: &'a GameState,
    /// Removed suffix in index order.
    pub undone: &'a [Action],
    /// Compensating actions, indexed from the first undone index.
    pub redone: &'a [Action],
}

pub trait UndoValidator: Send + Sync {
    fn validate(&self, ctx: &UndoContext<'_>) -> Result<UndoDecision, RuntimeError>;
}

impl<F> UndoValidator for F
where
    F: Fn(&UndoContext<'_>) -> Result<UndoDecision, RuntimeError> + Send + Sync,
{
    fn validate(&self, ctx: &UndoContext<'_>) -> Result<UndoDecision, RuntimeError> {
        self(ctx)
    }
}

/// Keeps the document status in line with the state's result: finishing
/// moves the game to `Finished`, undoing past the finish reactivates it.
pub fn status_updates(game: &GameDocument, new_state: &GameState) -> Vec<GameUpdate> {
    match (game.status, new_state.is_finished()) {
        (GameStatus::Finished, false) => vec![GameUpdate::SetStatus(GameStatus::Active)],
        (status, true) if status != GameStatus::Finished => {
            vec![GameUpdate::SetStatus(GameStatus::Finished)]
        }
        _ => vec![GameUpdate::Touch],
    }
}
