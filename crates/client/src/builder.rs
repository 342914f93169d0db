//! Client builder with dependency injection pattern.

use anyhow::{Context, Result, ensure};
use client_bootstrap::SessionConfig;
use game_core::{GameId, PlayerId};
use runtime::GameService;

use crate::Client;

/// Builder for constructing a [`Client`] with validation.
///
/// The server and the seated players are required; the game id defaults to
/// `table-1` and the configuration to its defaults.
#[derive(Default)]
pub struct ClientBuilder {
    config: Option<SessionConfig>,
    service: Option<GameService>,
    game_id: Option<GameId>,
    players: Vec<PlayerId>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the server the table plays against (required).
    pub fn service(mut self, service: GameService) -> Self {
        self.service = Some(service);
        self
    }

    pub fn game(mut self, game_id: impl Into<GameId>) -> Self {
        self.game_id = Some(game_id.into());
        self
    }

    /// Seat players in turn order (at least two required).
    pub fn players<I, P>(mut self, players: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PlayerId>,
    {
        self.players = players.into_iter().map(Into::into).collect();
        self
    }

    /// Build the Client.
    ///
    /// # Errors
    ///
    /// Returns an error if the service is not set or fewer than two players
    /// are seated.
    pub fn build(self) -> Result<Client> {
        let service = self
            .service
            .context("Service is required. Use .service() to set it.")?;
        ensure!(
            self.players.len() >= 2,
            "At least two players are required. Use .players() to seat them."
        );

        Ok(Client {
            config: self.config.unwrap_or_default(),
            service,
            game_id: self.game_id.unwrap_or_else(|| GameId::new("table-1")),
            players: self.players,
        })
    }
}
