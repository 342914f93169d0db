//! In-process cache backend for tests and local runs.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::backend::{CacheBackend, CacheError, CacheWrite, Watched};

#[derive(Clone, Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: String, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// `HashMap`-backed [`CacheBackend`] with lazy TTL expiry.
///
/// [`MemoryCacheBackend::set_available`] simulates an outage: while
/// unavailable every call fails with [`CacheError::Unavailable`].
pub struct MemoryCacheBackend {
    entries: Mutex<HashMap<String, Entry>>,
    available: AtomicBool,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Raw value of `key`, bypassing availability. For assertions.
    pub fn peek(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.entries
            .lock()
            .ok()?
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, Entry>, Instant) -> T) -> Result<T, CacheError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("memory cache switched off".into()));
        }
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CacheError::Unavailable("memory cache lock poisoned".into()))?;
        let now = Instant::now();
        entries.retain(|_, entry| entry.is_live(now));
        Ok(f(&mut entries, now))
    }
}

impl Default for MemoryCacheBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.with_entries(|entries, _| entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        self.with_entries(|entries, _| {
            keys.iter()
                .map(|key| entries.get(key).map(|entry| entry.value.clone()))
                .collect()
        })
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.with_entries(|entries, _| {
            entries.insert(key.to_string(), Entry::new(value, ttl));
        })
    }

    async fn mset(&self, values: Vec<(String, String)>, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.with_entries(|entries, _| {
            for (key, value) in values {
                entries.insert(key, Entry::new(value, ttl));
            }
        })
    }

    async fn incr(&self, key: &str, amount: i64) -> Result<i64, CacheError> {
        self.with_entries(|entries, _| {
            let current = match entries.get(key) {
                Some(entry) => entry
                    .value
                    .parse::<i64>()
                    .map_err(|e| CacheError::Codec(format!("{key} is not a counter: {e}")))?,
                None => 0,
            };
            let next = current
                .checked_add(amount)
                .ok_or_else(|| CacheError::Codec(format!("{key} would overflow")))?;
            let expires_at = entries.get(key).and_then(|entry| entry.expires_at);
            entries.insert(
                key.to_string(),
                Entry {
                    value: next.to_string(),
                    expires_at,
                },
            );
            Ok(next)
        })?
    }

    async fn commit_if_unchanged(&self, watched: &[Watched], writes: Vec<CacheWrite>) -> Result<bool, CacheError> {
        self.with_entries(|entries, _| {
            let unchanged = watched
                .iter()
                .all(|w| entries.get(&w.key).map(|entry| &entry.value) == w.observed.as_ref());
            if !unchanged {
                return false;
            }
            for write in writes {
                match write {
                    CacheWrite::Set { key, value, ttl } => {
                        entries.insert(key, Entry::new(value, ttl));
                    }
                    CacheWrite::Delete { key } => {
                        entries.remove(&key);
                    }
                }
            }
            true
        })
    }
}
