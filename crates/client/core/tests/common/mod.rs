#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use client_core::{ApiError, GameServerApi, Replica};
use game_content::SealedRoundRules;
use game_core::{
    Action, Game, GameDocument, GameEngine, GameId, GameView, PlayerId, SubmitRequest,
    SubmitResponse, SyncReport, SyncRequest, SyncStatus, UndoRequest, UndoResponse, ValidationError,
    apply_undo, plan_undo,
};

const TAIL_WINDOW: usize = 5;

pub fn seats(names: &[&str]) -> Vec<PlayerId> {
    names.iter().copied().map(PlayerId::new).collect()
}

pub fn new_game(players: &[PlayerId]) -> Game {
    Game::new(
        GameDocument::new("g1", "sealed-round", players.to_vec()),
        SealedRoundRules::initial_state(players),
    )
}

/// Runs notes with the given ids against `game`, returning the log entries.
pub fn write_notes(game: &mut Game, player: &PlayerId, ids: &[&str]) -> Vec<Action> {
    let rules = SealedRoundRules::default();
    let mut log = Vec::new();
    for id in ids {
        let note = SealedRoundRules::note(game, id, player, "hi");
        let outcome = GameEngine::new(&rules, game).execute(&note).expect("note should apply");
        log.extend(outcome.processed_actions);
    }
    log
}

pub fn replica_of(game: &Game, log: &[Action]) -> Replica {
    let view = GameView {
        document: game.document.clone(),
        state: game.state.clone(),
    };
    Replica::new(view, log.to_vec()).expect("log should match game")
}

struct Stored {
    game: Game,
    log: Vec<Action>,
}

/// In-memory server holding one canonical log.
pub struct FakeServer {
    rules: SealedRoundRules,
    stored: Mutex<Stored>,
    offline: AtomicBool,
    fetch_failing: AtomicBool,
    submit_delay: Mutex<Duration>,
    pub sync_checks: AtomicUsize,
}

impl FakeServer {
    pub fn new(game: Game, log: Vec<Action>) -> Self {
        Self {
            rules: SealedRoundRules::default(),
            stored: Mutex::new(Stored { game, log }),
            offline: AtomicBool::new(false),
            fetch_failing: AtomicBool::new(false),
            submit_delay: Mutex::new(Duration::ZERO),
            sync_checks: AtomicUsize::new(0),
        }
    }

    pub fn game(&self) -> Game {
        self.stored.lock().unwrap().game.clone()
    }

    pub fn log(&self) -> Vec<Action> {
        self.stored.lock().unwrap().log.clone()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Fails full game fetches while sync checks keep answering.
    pub fn set_fetch_failing(&self, failing: bool) {
        self.fetch_failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_submit_delay(&self, delay: Duration) {
        *self.submit_delay.lock().unwrap() = delay;
    }

    /// Commits `action` at the tail, reporting what the submitter missed.
    pub fn commit(&self, action: Action) -> Result<SubmitResponse, ValidationError> {
        let mut guard = self.stored.lock().unwrap();
        let stored = &mut *guard;
        let seen = usize::try_from(action.index).unwrap().min(stored.log.len());
        let missing_actions = stored.log[seen..].to_vec();
        let outcome = GameEngine::new(&self.rules, &mut stored.game).execute(&action)?;
        stored.log.extend(outcome.processed_actions.iter().cloned());
        Ok(SubmitResponse {
            actions: outcome.processed_actions,
            missing_actions,
            checksum: stored.game.state.action_checksum,
        })
    }

    fn online(&self) -> Result<(), ApiError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ApiError::Transport("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl GameServerApi for FakeServer {
    async fn get_game(&self, _game_id: &GameId) -> Result<GameView, ApiError> {
        self.online()?;
        if self.fetch_failing.load(Ordering::SeqCst) {
            return Err(ApiError::Transport("game fetch timed out".into()));
        }
        let game = self.game();
        Ok(GameView {
            document: game.document,
            state: game.state,
        })
    }

    async fn get_actions(&self, _game_id: &GameId, start: u64, end: u64) -> Result<Vec<Action>, ApiError> {
        self.online()?;
        Ok(self
            .log()
            .into_iter()
            .filter(|action| action.index >= start && action.index < end)
            .collect())
    }

    async fn submit_action(&self, request: SubmitRequest) -> Result<SubmitResponse, ApiError> {
        self.online()?;
        let response = self
            .commit(request.action)
            .map_err(|error| ApiError::Rejected(error.to_string()))?;
        let delay = *self.submit_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(response)
    }

    async fn undo_action(&self, request: UndoRequest) -> Result<UndoResponse, ApiError> {
        self.online()?;
        let mut guard = self.stored.lock().unwrap();
        let stored = &mut *guard;
        let plan = plan_undo(&stored.log, &request.action_id, &request.player_id)
            .map_err(|error| ApiError::Rejected(error.to_string()))?;
        let redone = apply_undo(&self.rules, &mut stored.game, &plan)
            .map_err(|error| ApiError::Rejected(error.to_string()))?;
        stored.log.truncate(plan.target.index as usize);
        stored.log.extend(redone.iter().cloned());
        Ok(UndoResponse {
            undone_actions: plan.undone,
            redone_actions: redone,
            checksum: stored.game.state.action_checksum,
        })
    }

    async fn check_sync(&self, request: SyncRequest) -> Result<SyncReport, ApiError> {
        self.online()?;
        self.sync_checks.fetch_add(1, Ordering::SeqCst);
        let stored = self.stored.lock().unwrap();
        let checksum = stored.game.state.action_checksum;
        let tail_index = stored.game.state.action_count.checked_sub(1);
        if request.checksum == checksum && request.tail_index == tail_index {
            return Ok(SyncReport {
                status: SyncStatus::InSync,
                actions: Vec::new(),
                checksum,
            });
        }
        let from = stored.log.len().saturating_sub(TAIL_WINDOW);
        Ok(SyncReport {
            status: SyncStatus::OutOfSync,
            actions: stored.log[from..].to_vec(),
            checksum,
        })
    }
}
