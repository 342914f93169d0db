//! Keeps one client's replica in step with the server's canonical log.
//!
//! Actions are applied to the replica before the server answers, unless they
//! reveal hidden information. The server's response is authoritative: when
//! it carries actions the client had missed, or its checksum disagrees with
//! the replica, the replica is rebuilt from the last known-good snapshot or
//! refetched outright. Every failure rolls back to that snapshot, raises a
//! [`Notice`], and marks the replica for a resync.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use game_core::{
    Action, ActionChecksum, ActionId, GameId, GameRules, PlayerId, Push, SubmitRequest,
    SyncRequest, SyncStatus, UndoRequest, UndoResponse, ValidationError, engine, plan_undo,
};

use crate::api::{ApiError, GameServerApi};
use crate::error::{Result, SyncError};
use crate::history::History;
use crate::notice::Notice;
use crate::replica::Replica;

const NOTICE_CAPACITY: usize = 64;

/// How a resync ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resync {
    InSync,
    /// The first `kept` local actions were confirmed and `replayed` server
    /// actions were applied after them.
    Anchored { kept: u64, replayed: usize },
    /// Game and log were refetched from scratch.
    Full,
}

pub struct SyncCoordinator {
    game_id: GameId,
    player_id: PlayerId,
    api: Arc<dyn GameServerApi>,
    rules: Arc<dyn GameRules>,
    live: Replica,
    history: Option<History>,
    needs_resync: bool,
    notices: broadcast::Sender<Notice>,
}

impl SyncCoordinator {
    pub fn new(
        api: Arc<dyn GameServerApi>,
        rules: Arc<dyn GameRules>,
        player_id: PlayerId,
        replica: Replica,
    ) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            game_id: replica.game().id().clone(),
            player_id,
            api,
            rules,
            live: replica,
            history: None,
            needs_resync: false,
            notices,
        }
    }

    /// Fetches the game and its whole log, then starts in play mode.
    pub async fn connect(
        api: Arc<dyn GameServerApi>,
        rules: Arc<dyn GameRules>,
        game_id: &GameId,
        player_id: PlayerId,
    ) -> Result<Self> {
        let replica = fetch_replica(api.as_ref(), game_id).await?;
        info!(
            game_id = %game_id,
            player = %player_id,
            actions = replica.count(),
            "replica connected"
        );
        Ok(Self::new(api, rules, player_id, replica))
    }

    pub fn game_id(&self) -> &GameId {
        &self.game_id
    }

    pub fn player_id(&self) -> &PlayerId {
        &self.player_id
    }

    /// The replica tracking the server.
    pub fn live(&self) -> &Replica {
        &self.live
    }

    /// What the player currently sees: the history view or the live replica.
    pub fn visible(&self) -> &Replica {
        self.history.as_ref().map_or(&self.live, History::view)
    }

    pub fn history(&self) -> Option<&History> {
        self.history.as_ref()
    }

    pub fn needs_resync(&self) -> bool {
        self.needs_resync
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    pub fn notice_sender(&self) -> broadcast::Sender<Notice> {
        self.notices.clone()
    }

    // ------------------------------------------------------------------
    // Actions
    // ------------------------------------------------------------------

    /// Submits `action` at the local tail and settles the replica on the
    /// server's answer. Returns the canonical actions committed for it.
    pub async fn apply_action(&mut self, mut action: Action) -> Result<Vec<Action>> {
        if self.history.is_some() {
            return Err(SyncError::ReadOnlyHistory);
        }
        action.index = self.live.count();
        let snapshot = self.live.clone();

        let outcome = match engine::run(self.rules.as_ref(), &action, self.live.game()) {
            Ok(outcome) => outcome,
            Err(error) => {
                self.reject(&action.id, error.to_string());
                return Err(error.into());
            }
        };
        if outcome.reveals_info() {
            debug!(action = %action.id, "action reveals hidden information, waiting for server");
        } else {
            self.live.accept(outcome);
        }

        let request = SubmitRequest {
            game_id: self.game_id.clone(),
            action: action.clone(),
        };
        match self.api.submit_action(request).await {
            Ok(response) => {
                let committed = response.actions.clone();
                let optimistic = self.live.log().get(snapshot.log().len()..).unwrap_or_default();
                let confirmed = response.missing_actions.is_empty()
                    && same_ids(optimistic, &response.actions)
                    && self.live.recomputed_checksum() == response.checksum;
                if !confirmed {
                    debug!(
                        action = %action.id,
                        missing = response.missing_actions.len(),
                        "replaying canonical actions over snapshot"
                    );
                    let canonical = response.missing_actions.iter().chain(&response.actions);
                    self.replay_over(snapshot, canonical, response.checksum).await?;
                }
                Ok(committed)
            }
            Err(error) => {
                self.live = snapshot;
                Err(self.fail(&action.id, error))
            }
        }
    }

    /// Undoes `action_id` locally, then on the server. A server redo set that
    /// differs from the local one replaces it.
    pub async fn undo_action(&mut self, action_id: &ActionId) -> Result<UndoResponse> {
        if self.history.is_some() {
            return Err(SyncError::ReadOnlyHistory);
        }
        let snapshot = self.live.clone();

        let undone = plan_undo(self.live.log(), action_id, &self.player_id)
            .and_then(|plan| self.live.undo(self.rules.as_ref(), &plan).map(|_| plan));
        let plan = match undone {
            Ok(plan) => plan,
            Err(error) => {
                self.live = snapshot;
                self.reject(action_id, error.to_string());
                return Err(error.into());
            }
        };

        let request = UndoRequest {
            game_id: self.game_id.clone(),
            action_id: action_id.clone(),
            player_id: self.player_id.clone(),
        };
        let response = match self.api.undo_action(request).await {
            Ok(response) => response,
            Err(error) => {
                self.live = snapshot;
                return Err(self.fail(action_id, error));
            }
        };

        if self.live.recomputed_checksum() != response.checksum {
            debug!(action = %action_id, "local redo differs from server, adopting server redo set");
            let mut base = snapshot;
            base.truncate(self.rules.as_ref(), plan.target.index)?;
            self.replay_over(base, &response.redone_actions, response.checksum)
                .await?;
        }
        Ok(response)
    }

    /// Applies `actions` on top of `base` and adopts the result, refetching
    /// everything when it does not reach `checksum`.
    async fn replay_over<'a>(
        &mut self,
        mut base: Replica,
        actions: impl IntoIterator<Item = &'a Action>,
        checksum: ActionChecksum,
    ) -> Result<()> {
        let replayed = base.apply_all(self.rules.as_ref(), actions);
        let found = base.recomputed_checksum();
        self.live = base;
        match replayed {
            Ok(()) if found == checksum => Ok(()),
            Ok(()) => {
                warn!(expected = %checksum, found = %found, "checksum mismatch, refetching game");
                self.full_resync().await.map(|_| ())
            }
            Err(error) => {
                warn!(%error, "canonical actions failed to apply, refetching game");
                self.full_resync().await.map(|_| ())
            }
        }
    }

    fn reject(&self, action_id: &ActionId, reason: String) {
        self.notify(Notice::ActionRejected {
            action_id: action_id.clone(),
            reason,
        });
    }

    fn fail(&mut self, action_id: &ActionId, error: ApiError) -> SyncError {
        warn!(action = %action_id, %error, "server call failed, rolled back");
        match &error {
            ApiError::Rejected(reason) => self.reject(action_id, reason.clone()),
            ApiError::Transport(reason) => self.notify(Notice::ConnectionProblem {
                reason: reason.clone(),
            }),
        }
        self.needs_resync = true;
        error.into()
    }

    fn notify(&self, notice: Notice) {
        // No subscribers is fine.
        let _ = self.notices.send(notice);
    }

    // ------------------------------------------------------------------
    // Pushes
    // ------------------------------------------------------------------

    /// Integrates a server push. Held back while in history mode.
    pub async fn receive_push(&mut self, push: Push) -> Result<()> {
        if push.game_id() != &self.game_id {
            debug!(game_id = %push.game_id(), "ignoring push for another game");
            return Ok(());
        }
        if let Some(history) = self.history.as_mut() {
            history.queue(push);
            return Ok(());
        }
        self.apply_push(push).await
    }

    async fn apply_push(&mut self, push: Push) -> Result<()> {
        let mut next = self.live.clone();
        let rules = self.rules.as_ref();
        let lined_up = match &push {
            Push::Appended { actions, .. } => integrate_appended(&mut next, rules, actions),
            Push::Undone {
                undone_action,
                redone_actions,
                ..
            } => integrate_undone(&mut next, rules, undone_action, redone_actions),
        };
        match lined_up {
            Ok(true) => {
                self.live = next;
                Ok(())
            }
            Ok(false) => {
                debug!(game_id = %self.game_id, "push does not line up with local log, resyncing");
                self.resync().await.map(|_| ())
            }
            Err(error) => {
                warn!(game_id = %self.game_id, %error, "push failed to apply, resyncing");
                self.resync().await.map(|_| ())
            }
        }
    }

    // ------------------------------------------------------------------
    // Resync
    // ------------------------------------------------------------------

    /// Asks the server whether the replica agrees with it and repairs it if
    /// not.
    pub async fn resync(&mut self) -> Result<Resync> {
        let request = SyncRequest {
            game_id: self.game_id.clone(),
            checksum: self.live.checksum(),
            tail_index: self.live.tail_index(),
        };
        let outcome = match self.api.check_sync(request).await {
            Ok(report) => match report.status {
                SyncStatus::InSync => Ok(Resync::InSync),
                SyncStatus::OutOfSync => self.try_to_resync(&report.actions, report.checksum).await,
            },
            Err(error) => {
                self.notify(Notice::ConnectionProblem {
                    reason: error.to_string(),
                });
                Err(error.into())
            }
        };
        // A failed resync leaves the replica suspect until the next one succeeds.
        self.needs_resync = outcome.is_err();
        outcome
    }

    /// Runs [`Self::resync`] if an earlier failure asked for one.
    pub async fn resync_if_needed(&mut self) -> Result<Option<Resync>> {
        if !self.needs_resync {
            return Ok(None);
        }
        self.resync().await.map(Some)
    }

    /// Repairs the replica from a short server tail ending at `checksum`.
    ///
    /// The anchor is the latest local action matching the server at the same
    /// index before the first divergence in `tail`. Local actions after it
    /// are reversed and the server's are replayed. Without an anchor, or if
    /// the repair does not reach `checksum`, the game is refetched.
    pub async fn try_to_resync(&mut self, tail: &[Action], checksum: ActionChecksum) -> Result<Resync> {
        if let Some(kept) = self.confirmed_prefix(tail) {
            let mut repaired = self.live.clone();
            let replay: Vec<&Action> = tail.iter().filter(|action| action.index >= kept).collect();
            let replayed = replay.len();
            let rules = self.rules.as_ref();
            let result = repaired
                .truncate(rules, kept)
                .and_then(|_| repaired.apply_all(rules, replay));
            match result {
                Ok(()) if repaired.recomputed_checksum() == checksum => {
                    info!(game_id = %self.game_id, kept, replayed, "resynced from common anchor");
                    if let Err(error) = self.replace_live(repaired) {
                        self.needs_resync = true;
                        return Err(error);
                    }
                    self.needs_resync = false;
                    self.notify(Notice::Resynced {
                        game_id: self.game_id.clone(),
                        kept,
                        full: false,
                    });
                    return Ok(Resync::Anchored { kept, replayed });
                }
                Ok(()) => debug!(game_id = %self.game_id, "anchored repair missed server checksum"),
                Err(error) => debug!(game_id = %self.game_id, %error, "anchored repair failed"),
            }
        }
        self.full_resync().await
    }

    /// Refetches the game and its entire log.
    pub async fn full_resync(&mut self) -> Result<Resync> {
        let replica = match fetch_replica(self.api.as_ref(), &self.game_id).await {
            Ok(replica) => replica,
            Err(error) => {
                warn!(game_id = %self.game_id, %error, "refetching game failed");
                self.notify(Notice::ConnectionProblem {
                    reason: error.to_string(),
                });
                self.needs_resync = true;
                return Err(error);
            }
        };
        info!(game_id = %self.game_id, actions = replica.count(), "refetched game");
        if let Err(error) = self.replace_live(replica) {
            self.needs_resync = true;
            return Err(error);
        }
        self.needs_resync = false;
        self.notify(Notice::Resynced {
            game_id: self.game_id.clone(),
            kept: 0,
            full: true,
        });
        Ok(Resync::Full)
    }

    /// Length of the local prefix `tail` confirms, or `None` if the window
    /// shares no action with the local log.
    fn confirmed_prefix(&self, tail: &[Action]) -> Option<u64> {
        let Some(first) = tail.first() else {
            return Some(0);
        };
        let mut kept = None;
        for action in tail {
            match self.live.action_at(action.index) {
                Some(local) if local.id == action.id => kept = Some(action.index + 1),
                _ => break,
            }
        }
        kept.or((first.index == 0).then_some(0))
    }

    fn replace_live(&mut self, replica: Replica) -> Result<()> {
        self.live = replica;
        if let Some(history) = self.history.as_mut() {
            history.rebase(self.rules.as_ref(), &self.live)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    /// Freezes the live replica and starts scrubbing at its tail. Returns
    /// the cursor.
    pub fn enter_history(&mut self) -> u64 {
        let history = self.history.get_or_insert_with(|| History::enter(&self.live));
        history.cursor()
    }

    pub fn seek(&mut self, position: u64) -> Result<u64> {
        let history = self.history.as_mut().ok_or(SyncError::NotInHistory)?;
        Ok(history.seek(self.rules.as_ref(), &self.live, position)?)
    }

    pub fn step_back(&mut self) -> Result<u64> {
        let cursor = self.cursor()?;
        self.seek(cursor.saturating_sub(1))
    }

    pub fn step_forward(&mut self) -> Result<u64> {
        let cursor = self.cursor()?;
        self.seek(cursor + 1)
    }

    /// Starts playback from the cursor, or from the beginning when the
    /// cursor is already at the tail.
    pub fn start_autoplay(&mut self) -> Result<()> {
        if self.cursor()? >= self.live.count() {
            self.seek(0)?;
        }
        if let Some(history) = self.history.as_mut() {
            history.set_autoplay(true);
        }
        Ok(())
    }

    pub fn stop_autoplay(&mut self) -> Result<()> {
        let history = self.history.as_mut().ok_or(SyncError::NotInHistory)?;
        history.set_autoplay(false);
        Ok(())
    }

    /// Advances playback one action. Returns whether playback continues.
    pub fn autoplay_step(&mut self) -> Result<bool> {
        let history = self.history.as_ref().ok_or(SyncError::NotInHistory)?;
        if !history.is_autoplaying() {
            return Ok(false);
        }
        let cursor = self.step_forward()?;
        let running = cursor < self.live.count();
        if !running {
            self.stop_autoplay()?;
        }
        Ok(running)
    }

    /// Returns to play mode and integrates the pushes held back meanwhile.
    /// Returns how many were replayed.
    ///
    /// Every queued push is attempted. If any fails, the first error is
    /// returned and the replica is marked for a resync.
    pub async fn exit_history(&mut self) -> Result<usize> {
        let mut history = self.history.take().ok_or(SyncError::NotInHistory)?;
        let queued = history.take_queued();
        let replayed = queued.len();
        let mut first_error = None;
        for push in queued {
            if let Err(error) = self.apply_push(push).await {
                warn!(game_id = %self.game_id, %error, "queued push failed");
                first_error.get_or_insert(error);
            }
        }
        debug!(game_id = %self.game_id, replayed, "left history mode");
        match first_error {
            Some(error) => {
                self.needs_resync = true;
                Err(error)
            }
            None => Ok(replayed),
        }
    }

    fn cursor(&self) -> Result<u64> {
        self.history
            .as_ref()
            .map(History::cursor)
            .ok_or(SyncError::NotInHistory)
    }
}

async fn fetch_replica(api: &dyn GameServerApi, game_id: &GameId) -> Result<Replica> {
    let view = api.get_game(game_id).await?;
    let log = api.get_actions(game_id, 0, view.state.action_count).await?;
    Replica::new(view, log)
}

fn same_ids(local: &[Action], canonical: &[Action]) -> bool {
    local.len() == canonical.len()
        && local
            .iter()
            .zip(canonical)
            .all(|(a, b)| a.id == b.id && a.index == b.index)
}

/// Places appended actions. Actions already present are skipped; a gap or
/// a conflicting id means the push does not line up.
fn integrate_appended(
    replica: &mut Replica,
    rules: &dyn GameRules,
    actions: &[Action],
) -> std::result::Result<bool, ValidationError> {
    for action in actions {
        match replica.action_at(action.index).map(|local| local.id == action.id) {
            Some(true) => continue,
            Some(false) => return Ok(false),
            None if action.index == replica.count() => replica.apply(rules, action)?,
            None => return Ok(false),
        }
    }
    Ok(true)
}

/// Removes the undone suffix and applies the redo actions, or confirms the
/// replica already reflects them.
fn integrate_undone(
    replica: &mut Replica,
    rules: &dyn GameRules,
    undone: &Action,
    redone: &[Action],
) -> std::result::Result<bool, ValidationError> {
    if holds(replica, undone) {
        replica.truncate(rules, undone.index)?;
        replica.apply_all(rules, redone)?;
        return Ok(true);
    }
    Ok(replica.count() == undone.index + redone.len() as u64
        && redone.iter().all(|action| holds(replica, action)))
}

fn holds(replica: &Replica, action: &Action) -> bool {
    replica
        .action_at(action.index)
        .is_some_and(|local| local.id == action.id)
}
