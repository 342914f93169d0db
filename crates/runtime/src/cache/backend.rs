//! Contract for the key/value cache sitting in front of the document store.
//!
//! The backend deals in raw strings only. Interpretation of a stored string
//! as a value or a lock lives in [`super::slot`].

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Failures talking to the cache backend.
///
/// These never leave the cache module: the consistency service logs them and
/// degrades to cache-miss behavior.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("cache slot codec error: {0}")]
    Codec(String),
}

/// A key read as part of an optimistic transaction, with the raw value that
/// was observed (`None` when the key did not exist).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watched {
    pub key: String,
    pub observed: Option<String>,
}

impl Watched {
    pub fn new(key: impl Into<String>, observed: Option<String>) -> Self {
        Self {
            key: key.into(),
            observed,
        }
    }
}

/// One write of an optimistic transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheWrite {
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    Delete {
        key: String,
    },
}

impl CacheWrite {
    pub fn key(&self) -> &str {
        match self {
            CacheWrite::Set { key, .. } | CacheWrite::Delete { key } => key,
        }
    }
}

/// Key/value cache with per-key TTL, optimistic multi-key transactions and
/// atomic counters.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Values aligned with `keys`.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), CacheError>;

    async fn mset(&self, entries: Vec<(String, String)>, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Atomically adds `amount` to an integer key (missing keys count as 0).
    async fn incr(&self, key: &str, amount: i64) -> Result<i64, CacheError>;

    /// Applies `writes` atomically if every watched key still holds the value
    /// it was observed with. Returns `false` (and writes nothing) otherwise.
    ///
    /// This is the WATCH / MULTI / EXEC primitive of the backend.
    async fn commit_if_unchanged(&self, watched: &[Watched], writes: Vec<CacheWrite>) -> Result<bool, CacheError>;
}
