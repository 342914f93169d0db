//! Request handlers behind the client↔server contract.
//!
//! [`GameService`] runs submitted actions through the shared reducer, hands
//! the result to the [`ActionLogStore`] and replays the whole read-run-commit
//! cycle when the commit loses an index race.

use std::cmp::Ordering;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};

use game_core::{
    Action, Game, GameDocument, GameId, GameRules, GameState, GameStatus, GameView,
    SubmitRequest, SubmitResponse, SyncReport, SyncRequest, SyncStatus, UndoRequest, UndoResponse,
    ValidationError, apply_undo, plan_undo,
};

use super::errors::{Result, RuntimeError};
use crate::config::RuntimeConfig;
use crate::events::EventBus;
use crate::repository::{
    ActionLogStore, AppendContext, AppendDecision, AppendPlan, GameUpdate, MissingActions,
    UndoContext, UndoDecision, status_updates,
};

/// Server entry point for one rule set.
#[derive(Clone)]
pub struct GameService {
    log: Arc<ActionLogStore>,
    rules: Arc<dyn GameRules>,
    config: RuntimeConfig,
}

impl GameService {
    pub fn new(log: Arc<ActionLogStore>, rules: Arc<dyn GameRules>, config: RuntimeConfig) -> Self {
        Self { log, rules, config }
    }

    pub fn log(&self) -> &Arc<ActionLogStore> {
        &self.log
    }

    pub fn events(&self) -> &EventBus {
        self.log.events()
    }

    pub fn rules(&self) -> &Arc<dyn GameRules> {
        &self.rules
    }

    pub async fn create_game(&self, document: GameDocument, state: GameState) -> Result<Game> {
        if document.title_id != self.rules.title() {
            return Err(ValidationError::illegal(format!(
                "title {} is not served here ({})",
                document.title_id,
                self.rules.title()
            ))
            .into());
        }
        self.log.create_game(document, state).await
    }

    /// Cached snapshot of a game.
    pub async fn get_game(&self, game_id: &GameId) -> Result<GameView> {
        self.log
            .cached_game(game_id)
            .await?
            .ok_or_else(|| RuntimeError::not_found("game", game_id))
    }

    /// Actions in `[start, end)`, clamped to the stored log.
    pub async fn get_actions(&self, game_id: &GameId, start: u64, end: u64) -> Result<Vec<Action>> {
        let game = self.log.load_game(game_id).await?;
        let end = end.min(game.state.action_count);
        self.log.find_action_range_for_game(game_id, start, end).await
    }

    pub async fn set_public(&self, game_id: &GameId, public: bool) -> Result<GameDocument> {
        self.log.update_game(game_id, &[GameUpdate::SetPublic(public)]).await
    }

    /// Runs and stores one client action.
    ///
    /// `request.action.index` is the tail the client assumed. If the log has
    /// since grown by actions of the submitted action's simultaneous group,
    /// those are returned as `missing_actions` ahead of the committed ones.
    pub async fn submit_action(&self, request: SubmitRequest) -> Result<SubmitResponse> {
        let game_id = &request.game_id;
        let action = &request.action;
        let response = self
            .with_retry("submit", game_id, || self.try_submit(game_id, action))
            .await?;

        info!(
            %game_id,
            action = %action.id,
            committed = response.actions.len(),
            missing = response.missing_actions.len(),
            checksum = %response.checksum,
            "action submitted"
        );
        Ok(response)
    }

    async fn try_submit(&self, game_id: &GameId, action: &Action) -> Result<SubmitResponse> {
        let game = self.log.load_game(game_id).await?;
        let outcome = game_core::engine::run(self.rules.as_ref(), action, &game)?;

        let proposed = action.index;
        let group = action.simultaneous_group_id.clone();
        let validator = |ctx: &AppendContext<'_>| -> Result<AppendDecision> {
            if ctx.game.status != GameStatus::Active {
                return Ok(AppendDecision::Cancel);
            }
            let tail = ctx.state.action_count;
            let stale = || RuntimeError::StaleTail {
                game_id: game_id.clone(),
                proposed,
                tail,
            };
            let missing_actions = match proposed.cmp(&tail) {
                Ordering::Equal => None,
                Ordering::Greater => return Err(stale()),
                Ordering::Less => match &group {
                    Some(group_id) => Some(MissingActions {
                        count: tail - proposed,
                        group_id: group_id.clone(),
                    }),
                    None => return Err(stale()),
                },
            };
            Ok(AppendDecision::Proceed(AppendPlan {
                game_updates: status_updates(ctx.game, ctx.new_state),
                missing_actions,
            }))
        };

        let committed = self
            .log
            .append_actions(game_id, outcome.processed_actions, outcome.updated_state, &validator)
            .await?
            .ok_or_else(|| ValidationError::illegal(format!("game {game_id} is not accepting actions")))?;

        Ok(SubmitResponse {
            actions: committed.actions,
            missing_actions: committed.missing_actions,
            checksum: committed.state.action_checksum,
        })
    }

    /// Undoes `request.action_id` and everything after it on behalf of
    /// `request.player_id`, redoing other group members' actions.
    pub async fn undo_action(&self, request: UndoRequest) -> Result<UndoResponse> {
        let game_id = &request.game_id;
        let response = self
            .with_retry("undo", game_id, || self.try_undo(&request))
            .await?;

        info!(
            %game_id,
            target = %request.action_id,
            undone = response.undone_actions.len(),
            redone = response.redone_actions.len(),
            checksum = %response.checksum,
            "action undone"
        );
        Ok(response)
    }

    async fn try_undo(&self, request: &UndoRequest) -> Result<UndoResponse> {
        let game_id = &request.game_id;
        let mut game = self.log.load_game(game_id).await?;
        let target = self
            .log
            .find_action(game_id, &request.action_id)
            .await?
            .ok_or_else(|| RuntimeError::not_found("action", &request.action_id))?;

        let window = self.undo_window(game_id, &target, game.state.action_count).await?;
        let plan = plan_undo(&window, &target.id, &request.player_id)?;
        let redone = apply_undo(self.rules.as_ref(), &mut game, &plan)?;

        let validator = |ctx: &UndoContext<'_>| -> Result<UndoDecision> {
            Ok(UndoDecision::Proceed(status_updates(ctx.game, ctx.new_state)))
        };
        let committed = self
            .log
            .undo_actions_from_game(game_id, plan.undone, redone, game.state, &validator)
            .await?
            .ok_or_else(|| ValidationError::illegal(format!("undo on game {game_id} was cancelled")))?;

        Ok(UndoResponse {
            undone_actions: committed.undone,
            redone_actions: committed.redone,
            checksum: committed.state.action_checksum,
        })
    }

    /// The log from the first member of the target's group (or the target
    /// itself) up to `tail`.
    async fn undo_window(&self, game_id: &GameId, target: &Action, tail: u64) -> Result<Vec<Action>> {
        let mut start = target.index;
        let mut window = self.log.find_action_range_for_game(game_id, start, tail).await?;
        if target.simultaneous_group_id.is_none() {
            return Ok(window);
        }

        let step = self.log.chunk_size();
        while start > 0 {
            let from = start.saturating_sub(step);
            let before = self.log.find_action_range_for_game(game_id, from, start).await?;
            let members = before
                .iter()
                .rev()
                .take_while(|action| action.shares_group_with(target))
                .count();
            let outsiders = before.len() - members;
            window.splice(0..0, before.into_iter().skip(outsiders));
            if outsiders > 0 || members == 0 {
                break;
            }
            start = from;
        }
        Ok(window)
    }

    /// Compares the client's view with the log. Out of sync clients get the
    /// most recent actions to find a common anchor in.
    pub async fn check_sync(&self, request: SyncRequest) -> Result<SyncReport> {
        let game_id = &request.game_id;
        let state = self.log.load_game(game_id).await?.state;
        let checksum = state.action_checksum;

        if request.checksum == checksum && request.tail_index == state.action_count.checked_sub(1) {
            return Ok(SyncReport {
                status: SyncStatus::InSync,
                actions: Vec::new(),
                checksum,
            });
        }

        let start = state.action_count.saturating_sub(self.config.sync_tail_window);
        let actions = self
            .log
            .find_action_range_for_game(game_id, start, state.action_count)
            .await?;
        info!(
            %game_id,
            client_checksum = %request.checksum,
            client_tail = ?request.tail_index,
            %checksum,
            count = state.action_count,
            "client out of sync"
        );
        Ok(SyncReport {
            status: SyncStatus::OutOfSync,
            actions,
            checksum,
        })
    }

    /// Replays `attempt` while it fails with a retryable collision, up to
    /// `append_retry_attempts` times in total.
    async fn with_retry<T, F, Fut>(&self, operation: &'static str, game_id: &GameId, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.config.append_retry_attempts.max(1);
        let mut tried = 0;
        loop {
            tried += 1;
            match attempt().await {
                Err(error) if error.is_retryable() && tried < attempts => {
                    debug!(%game_id, operation, attempt = tried, %error, "retrying after collision");
                }
                Err(error) if error.is_retryable() => {
                    warn!(%game_id, operation, attempts, "giving up after repeated collisions");
                    return Err(error);
                }
                other => return other,
            }
        }
    }
}
