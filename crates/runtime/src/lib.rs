//! Server side of the synchronized action log.
//!
//! Modules are organized by responsibility:
//! - [`cache`] keeps derived cache entries coherent with the store through
//!   read locks, write locks and best-effort degradation
//! - [`repository`] owns the authoritative, chunked action log and the game
//!   documents around it
//! - [`events`] fans committed appends and undos out to subscribers
//! - [`api`] exposes the request handlers and the errors they surface
//! - [`config`] holds the tuning knobs shared by all of the above
pub mod api;
pub mod cache;
pub mod config;
pub mod events;
pub mod repository;

pub use api::{GameService, Result, RuntimeError};
pub use cache::{CacheBackend, CacheConsistencyService, CacheError, MemoryCacheBackend};
pub use config::{ConfigError, RuntimeConfig};
pub use events::{EventBus, Notification, Topic};
pub use repository::{
    ActionLogStore, AppendOutcome, CacheKeys, DocumentStore, GameUpdate, MemoryDocumentStore,
    StoreError, UndoOutcome,
};
