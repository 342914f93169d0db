//! Reference rule sets plugged into the game engine.
//!
//! Rules are pure: they validate an action against a game and return the next
//! board. Log bookkeeping (indices, checksum, follow-up ordering) stays in
//! [`game_core::GameEngine`].
pub mod sealed_round;

pub use sealed_round::{Board, SealedRoundRules};
