//! Authoritative storage of games and their action logs.
//!
//! - [`traits`] is the document store contract and [`memory`] its in-process
//!   implementation.
//! - [`action_log`] builds the chunked log, undo and cached reads on top.
//! - [`keys`] lists the derived cache keys every mutation invalidates.
mod action_log;
mod error;
mod keys;
mod memory;
mod traits;
mod validator;

pub use action_log::{ActionLogStore, AppendOutcome, UndoOutcome};
pub use error::{StoreError, StoreResult};
pub use keys::{CacheKeys, Mutation};
pub use memory::MemoryDocumentStore;
pub use traits::{DocKey, Document, DocumentStore, GameQuery, Version, Versioned, WriteBatch};
pub use validator::{
    AppendContext, AppendDecision, AppendPlan, AppendValidator, GameUpdate, MissingActions,
    UndoContext, UndoDecision, UndoValidator, status_updates,
};
