//! Cache keys of data derived from the store, and which of them each kind of
//! mutation makes stale.

use game_core::{GameDocument, GameId, PlayerId, TitleId};

/// A store mutation site, for [`CacheKeys::for_mutation`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mutation {
    CreateGame,
    /// Appends may also change status or visibility through validator
    /// updates, so they cover the listings too.
    AppendActions,
    UndoActions,
    /// Direct status or visibility change without log activity.
    UpdateListing,
}

pub struct CacheKeys;

impl CacheKeys {
    pub fn game(id: &GameId) -> String {
        format!("game:{id}")
    }

    pub fn checksum(id: &GameId) -> String {
        format!("game:{id}:checksum")
    }

    pub fn etag(id: &GameId) -> String {
        format!("game:{id}:etag")
    }

    pub fn read_count(id: &GameId) -> String {
        format!("game:{id}:reads")
    }

    pub fn active_games(player: &PlayerId) -> String {
        format!("player:{player}:active-games")
    }

    pub fn open_games(title: &TitleId) -> String {
        format!("title:{title}:open-games")
    }

    pub fn public_games() -> String {
        "games:public".to_string()
    }

    /// Keys a `mutation` of `game` invalidates. Every entry is write locked
    /// for the duration of the mutation.
    pub fn for_mutation(game: &GameDocument, mutation: Mutation) -> Vec<String> {
        let id = &game.id;
        match mutation {
            Mutation::CreateGame | Mutation::AppendActions | Mutation::UndoActions => {
                let mut keys = vec![Self::game(id), Self::checksum(id), Self::etag(id)];
                keys.extend(Self::listings(game));
                keys
            }
            Mutation::UpdateListing => {
                let mut keys = vec![Self::game(id), Self::etag(id)];
                keys.extend(Self::listings(game));
                keys
            }
        }
    }

    fn listings(game: &GameDocument) -> Vec<String> {
        let mut keys: Vec<String> = game.player_ids.iter().map(Self::active_games).collect();
        keys.push(Self::open_games(&game.title_id));
        keys.push(Self::public_games());
        keys
    }
}
