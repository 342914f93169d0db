//! Cache coherence layer in front of the document store.
//!
//! - [`backend`] is the raw key/value contract and [`memory`] its in-process
//!   implementation.
//! - [`slot`] is the only code aware of how lock and value slots are encoded.
//! - [`service`] implements read-through caching and write exclusion.
pub mod backend;
pub mod memory;
pub mod service;
pub mod slot;

pub use backend::{CacheBackend, CacheError, CacheWrite, Watched};
pub use memory::MemoryCacheBackend;
pub use service::CacheConsistencyService;
pub use slot::{CacheSlot, HolderId, LockToken};
