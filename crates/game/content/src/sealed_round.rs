//! Sealed-bid rounds: every seated player commits a hidden bid per round;
//! once the last bid is in, a system `reveal` action discloses the bids and
//! scores the round.
//!
//! Bids of one round form a simultaneous group (`round-<n>`), so players may
//! submit them in any order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use game_core::{
    Action, Game, GameId, GameResult, GameRules, GameState, GroupId, PlayerId, RuleOutcome,
    TitleId, ValidationError,
};

pub const TITLE: &str = "sealed-round";

pub const PLAY: &str = "play";
pub const REVEAL: &str = "reveal";
pub const NOTE: &str = "note";

/// Board kept in [`GameState::board`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    pub round: u64,
    pub bids: BTreeMap<PlayerId, u32>,
    pub scores: BTreeMap<PlayerId, u32>,
    pub notes: u64,
}

/// What every action stores in its undo patch.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct Patch {
    board: Value,
    active_player_ids: Vec<PlayerId>,
    result: Option<GameResult>,
}

#[derive(Clone, Debug)]
pub struct SealedRoundRules {
    pub max_bid: u32,
    pub target_score: u32,
}

impl Default for SealedRoundRules {
    fn default() -> Self {
        Self {
            max_bid: 9,
            target_score: 3,
        }
    }
}

impl SealedRoundRules {
    pub fn new(max_bid: u32, target_score: u32) -> Self {
        Self {
            max_bid,
            target_score,
        }
    }

    /// Initial state for a game seating `players`.
    pub fn initial_state(players: &[PlayerId]) -> GameState {
        let board = Board {
            round: 1,
            scores: players.iter().map(|p| (p.clone(), 0)).collect(),
            ..Board::default()
        };
        GameState::new(players.to_vec(), to_value(&board))
    }

    pub fn board(state: &GameState) -> Result<Board, ValidationError> {
        serde_json::from_value(state.board.clone())
            .map_err(|e| ValidationError::invalid_payload("board", e.to_string()))
    }

    pub fn round_group(round: u64) -> GroupId {
        GroupId(format!("round-{round}"))
    }

    /// Builds a bid for the current round of `game`.
    pub fn bid(game: &Game, id: &str, player: &PlayerId, amount: u32) -> Action {
        let round = Self::board(&game.state).map(|b| b.round).unwrap_or(1);
        Action::user(id, game.id().clone(), player.clone(), PLAY, json!({ "bid": amount }))
            .in_group(Self::round_group(round))
            .at_index(game.state.action_count)
    }

    pub fn note(game: &Game, id: &str, player: &PlayerId, text: &str) -> Action {
        Action::user(id, game.id().clone(), player.clone(), NOTE, json!({ "text": text }))
            .at_index(game.state.action_count)
    }

    fn reveal_id(game_id: &GameId, round: u64) -> String {
        format!("{game_id}-round-{round}-reveal")
    }

    fn seated(game: &Game, action: &Action) -> Result<PlayerId, ValidationError> {
        let player = action
            .player_id
            .clone()
            .ok_or_else(|| ValidationError::illegal(format!("{} requires a player", action.kind)))?;
        if !game.document.has_player(&player) {
            return Err(ValidationError::UnknownPlayer { player });
        }
        Ok(player)
    }

    fn play(&self, action: &Action, game: &Game, mut board: Board) -> Result<RuleOutcome, ValidationError> {
        let player = Self::seated(game, action)?;
        if !game.state.active_player_ids.contains(&player) || board.bids.contains_key(&player) {
            return Err(ValidationError::NotActive { player });
        }
        if action.simultaneous_group_id.as_ref() != Some(&Self::round_group(board.round)) {
            return Err(ValidationError::illegal(format!(
                "bid must belong to round {}",
                board.round
            )));
        }
        let amount = action.payload["bid"]
            .as_u64()
            .ok_or_else(|| ValidationError::invalid_payload(PLAY, "missing bid"))?;
        if amount > u64::from(self.max_bid) {
            return Err(ValidationError::invalid_payload(
                PLAY,
                format!("bid {amount} exceeds {}", self.max_bid),
            ));
        }

        board.bids.insert(player.clone(), amount as u32);
        let mut state = game.state.clone();
        state.active_player_ids.retain(|p| p != &player);
        let round = board.round;
        let everyone_bid = state.active_player_ids.is_empty();
        state.board = to_value(&board);

        let outcome = RuleOutcome::new(state, patch(game));
        if everyone_bid {
            let reveal = Action::system(
                Self::reveal_id(&action.game_id, round),
                action.game_id.clone(),
                REVEAL,
                json!({ "round": round }),
            )
            .revealing();
            Ok(outcome.with_follow_up(reveal))
        } else {
            Ok(outcome)
        }
    }

    fn reveal(&self, game: &Game, mut board: Board) -> Result<RuleOutcome, ValidationError> {
        if board.bids.len() != game.document.player_ids.len() {
            return Err(ValidationError::illegal("not every player has bid"));
        }
        let top = board.bids.values().copied().max().unwrap_or(0);
        for (player, bid) in &board.bids {
            if *bid == top {
                *board.scores.entry(player.clone()).or_insert(0) += 1;
            }
        }

        let mut state = game.state.clone();
        let winners: Vec<PlayerId> = board
            .scores
            .iter()
            .filter(|(_, score)| **score >= self.target_score)
            .map(|(player, _)| player.clone())
            .collect();

        board.bids.clear();
        board.round += 1;
        if winners.is_empty() {
            state.active_player_ids = game.document.player_ids.clone();
        } else {
            state.active_player_ids.clear();
            state.result = Some(GameResult {
                summary: format!("won after {} rounds", board.round - 1),
                winners,
            });
        }
        state.board = to_value(&board);
        Ok(RuleOutcome::new(state, patch(game)))
    }

    fn note_action(&self, action: &Action, game: &Game, mut board: Board) -> Result<RuleOutcome, ValidationError> {
        Self::seated(game, action)?;
        if !action.payload["text"].is_string() {
            return Err(ValidationError::invalid_payload(NOTE, "missing text"));
        }
        board.notes += 1;
        let mut state = game.state.clone();
        state.board = to_value(&board);
        Ok(RuleOutcome::new(state, patch(game)))
    }
}

impl GameRules for SealedRoundRules {
    fn title(&self) -> TitleId {
        TitleId::new(TITLE)
    }

    fn run(&self, action: &Action, game: &Game) -> Result<RuleOutcome, ValidationError> {
        let board = Self::board(&game.state)?;
        match action.kind.as_str() {
            PLAY => self.play(action, game, board),
            REVEAL => self.reveal(game, board),
            NOTE => self.note_action(action, game, board),
            other => Err(ValidationError::UnknownActionType {
                kind: other.to_string(),
            }),
        }
    }

    fn undo_action(&self, game: &Game, action: &Action) -> Result<GameState, ValidationError> {
        let patch: Patch = serde_json::from_value(action.undo_patch.clone())
            .map_err(|e| ValidationError::invalid_payload("undo_patch", e.to_string()))?;
        let mut state = game.state.clone();
        state.board = patch.board;
        state.active_player_ids = patch.active_player_ids;
        state.result = patch.result;
        Ok(state)
    }
}

fn patch(game: &Game) -> Value {
    to_value(&Patch {
        board: game.state.board.clone(),
        active_player_ids: game.state.active_player_ids.clone(),
        result: game.state.result.clone(),
    })
}

fn to_value<T: Serialize>(value: &T) -> Value {
    // Board and Patch only contain maps with string keys and plain numbers.
    serde_json::to_value(value).unwrap_or(Value::Null)
}
