//! Shared bootstrap utilities for client front-ends.
//!
//! Provides configuration loading, log setup, an in-process server and the
//! assembly of synced client sessions that CLI or UI crates can reuse.
pub mod builder;
pub mod config;
pub mod local;
pub mod logging;

pub use builder::{ServerBuilder, Session, SessionBuilder};
pub use config::{SessionConfig, SyncConfig};
pub use local::LocalTransport;
pub use logging::setup_logging;
