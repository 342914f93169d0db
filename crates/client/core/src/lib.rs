//! Client-side replica of a game's action log.
//!
//! A [`SyncCoordinator`] applies the player's actions optimistically,
//! reconciles them with the server's canonical log, and repairs the replica
//! when it drifts. [`SyncWorker`] serializes access to it behind a cloneable
//! [`SyncHandle`].
pub mod api;
pub mod coordinator;
pub mod error;
pub mod history;
pub mod notice;
pub mod replica;
pub mod worker;

pub use api::{ApiError, GameServerApi};
pub use coordinator::{Resync, SyncCoordinator};
pub use error::{Result, SyncError};
pub use history::History;
pub use notice::Notice;
pub use replica::Replica;
pub use worker::{Command, ReplicaView, SyncHandle, SyncWorker};
