//! Identifier newtypes shared by the server and client replicas.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Identifier of one game instance.
    GameId
);

string_id!(
    /// Identifier of a seated player.
    PlayerId
);

string_id!(
    /// Identifier of a single action.
    ///
    /// Action ids are assigned by whoever creates the action (client or
    /// engine) and must be unique within a game. Redo actions derive their
    /// id deterministically, see [`crate::derive_redo_id`].
    ActionId
);

string_id!(
    /// Identifier shared by all actions of one simultaneous group.
    GroupId
);

string_id!(
    /// Identifier of a game title (rule set), used for listings.
    TitleId
);

/// Identifier of one stored chunk of a game's action log.
///
/// The chunk number is `floor(index / chunk_size)`; see [`crate::chunk`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkId {
    pub game_id: GameId,
    pub number: u64,
}

impl ChunkId {
    pub fn new(game_id: GameId, number: u64) -> Self {
        Self { game_id, number }
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/chunk-{}", self.game_id, self.number)
    }
}
