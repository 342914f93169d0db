//! Scripted table: every seated player gets a synced replica and plays
//! sealed-bid rounds through it until the game is decided.
//!
//! ```text
//! Client
//!   ├─→ GameService (in-process server)
//!   └─→ Session per player
//!         ├─→ SyncWorker (replica, single-flight)
//!         └─→ push forwarder (event bus → worker)
//! ```

mod builder;

pub use builder::ClientBuilder;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use client_bootstrap::{LocalTransport, Session, SessionBuilder, SessionConfig};
use client_core::{Replica, Resync};
use game_content::{SealedRoundRules, sealed_round::TITLE};
use game_core::{GameDocument, GameId, PlayerId};
use runtime::GameService;

const MAX_ROUNDS: u64 = 12;

pub struct Client {
    config: SessionConfig,
    service: GameService,
    game_id: GameId,
    players: Vec<PlayerId>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Creates the table, plays it out, then checks every replica against
    /// the server and replays the game in history mode.
    pub async fn run(self) -> Result<()> {
        let document = GameDocument::new(self.game_id.clone(), TITLE, self.players.clone());
        self.service
            .create_game(document, SealedRoundRules::initial_state(&self.players))
            .await
            .context("creating table")?;

        let mut sessions = Vec::with_capacity(self.players.len());
        for player in &self.players {
            let session = SessionBuilder::new(self.config.sync.clone())
                .transport(Arc::new(LocalTransport::new(self.service.clone())))
                .game(self.game_id.clone())
                .player(player.clone())
                .build()
                .await?;
            log_notices(&session);
            sessions.push(session);
        }

        self.open_table(&sessions[0]).await?;
        let rounds = self.play_rounds(&sessions).await?;

        for session in &sessions {
            let outcome = session.handle().resync().await?;
            if outcome != Resync::InSync {
                warn!(player = %session.player_id(), ?outcome, "replica needed repair at the end");
            }
        }
        self.replay(&sessions[sessions.len() - 1]).await?;

        let replica = current(&sessions[0]).await?;
        let board = SealedRoundRules::board(&replica.game().state)?;
        println!(
            "{} rounds, {} actions, checksum {}",
            rounds,
            replica.count(),
            replica.checksum()
        );
        for (player, score) in &board.scores {
            println!("  {player}: {score}");
        }
        if let Some(result) = &replica.game().state.result {
            println!("{}", result.summary);
        }

        for session in sessions {
            session.shutdown().await;
        }
        Ok(())
    }

    /// The first player leaves a note and takes it back.
    async fn open_table(&self, session: &Session) -> Result<()> {
        let replica = current(session).await?;
        let note = SealedRoundRules::note(
            replica.game(),
            &format!("{}-greeting", session.player_id()),
            session.player_id(),
            "good luck",
        );
        let id = note.id.clone();
        session.handle().submit(note).await?;
        let undone = session.handle().undo(id).await?;
        info!(undone = undone.undone_actions.len(), "opening note withdrawn");
        Ok(())
    }

    async fn play_rounds(&self, sessions: &[Session]) -> Result<u64> {
        for round in 1..=MAX_ROUNDS {
            for (seat, session) in sessions.iter().enumerate() {
                let replica = current(session).await?;
                if replica.game().state.is_finished() {
                    return Ok(round - 1);
                }
                let amount = bid_for(round, seat);
                let bid = SealedRoundRules::bid(
                    replica.game(),
                    &format!("{}-r{round}", session.player_id()),
                    session.player_id(),
                    amount,
                );
                let committed = session.handle().submit(bid).await?;
                info!(
                    player = %session.player_id(),
                    round,
                    amount,
                    committed = committed.len(),
                    "bid placed"
                );
            }
            if current(&sessions[0]).await?.game().state.is_finished() {
                return Ok(round);
            }
        }
        Ok(MAX_ROUNDS)
    }

    /// Autoplays the whole log in history mode and returns to play mode.
    async fn replay(&self, session: &Session) -> Result<()> {
        let step = self.config.sync.history_step;
        let handle = session.handle();
        handle.enter_history().await?;
        handle.autoplay(step).await?;
        while handle.view().await?.autoplaying {
            tokio::time::sleep(step).await;
        }
        let replayed = handle.exit_history().await?;
        info!(player = %session.player_id(), replayed, "history replay finished");
        Ok(())
    }
}

/// Brings the session up to date and returns what it shows.
async fn current(session: &Session) -> Result<Replica> {
    session.handle().resync().await?;
    Ok(session.handle().view().await?.visible)
}

fn bid_for(round: u64, seat: usize) -> u32 {
    ((round * 7 + seat as u64 * 3) % 10) as u32
}

fn log_notices(session: &Session) {
    let mut notices = session.handle().subscribe();
    let player = session.player_id().clone();
    tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(notice) => info!(%player, ?notice, "notice"),
                Err(RecvError::Lagged(skipped)) => warn!(%player, skipped, "notices dropped"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}
