//! Deterministic data model shared by the server log store and client replicas.
//!
//! `game-core` defines the canonical action log types, the order-sensitive
//! self-inverse checksum, chunk partitioning, undo planning, and the
//! [`GameEngine`] reducer wrapping a rule set. Server and client both depend
//! on these so that they compute identical indices, checksums, and redo ids
//! without coordinating.
pub mod action;
pub mod checksum;
pub mod chunk;
pub mod engine;
pub mod error;
pub mod ids;
pub mod protocol;
pub mod state;
pub mod undo;

pub use action::{Action, ActionSource, REDO_MARKER, derive_redo_id};
pub use checksum::ActionChecksum;
pub use chunk::{ActionChunk, ChunkError, append_to_chunks, chunk_ids_for_range, chunk_number};
pub use engine::{GameEngine, GameRules, RuleOutcome, RunOutcome};
pub use error::ValidationError;
pub use ids::{ActionId, ChunkId, GameId, GroupId, PlayerId, TitleId};
pub use protocol::{
    GameView, Push, SubmitRequest, SubmitResponse, SyncReport, SyncRequest, SyncStatus,
    UndoRequest, UndoResponse,
};
pub use state::{Game, GameDocument, GameResult, GameState, GameStatus};
pub use undo::{UndoError, UndoPlan, apply_undo, plan_undo};
