//! Read-through caching and write exclusion over a [`CacheBackend`].
//!
//! Readers that miss claim an empty slot with a [`LockToken`] and publish the
//! value they produced only if the slot still holds their token. Writers to
//! the authoritative store wrap the write in [`CacheConsistencyService::lock_while_writing`],
//! which replaces every slot with a write lock (overwriting read locks, so a
//! racing reader can no longer publish) and clears the slots afterwards.
//!
//! The cache is strictly best effort: backend errors are logged and turned
//! into cache misses. Nothing here can fail the caller's own operation.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::backend::{CacheBackend, CacheWrite, Watched};
use super::slot::{CacheSlot, HolderId, LockToken};
use crate::config::RuntimeConfig;

/// Optimistic transaction attempts for write lock acquire and release.
const MAX_LOCK_ATTEMPTS: usize = 5;

enum ReadAttempt<T> {
    /// Published value (`None` for a published absence).
    Hit(Option<T>),
    /// This reader owns the slot and may publish.
    Locked(LockToken),
    /// Produce without caching.
    Uncached,
}

#[derive(Clone)]
pub struct CacheConsistencyService {
    backend: Arc<dyn CacheBackend>,
    lock_ttl: Duration,
    value_ttl: Duration,
    read_lock_wait: Duration,
    read_lock_poll: Duration,
}

impl CacheConsistencyService {
    pub fn new(backend: Arc<dyn CacheBackend>, config: &RuntimeConfig) -> Self {
        Self {
            backend,
            lock_ttl: config.lock_ttl,
            value_ttl: config.cache_ttl,
            read_lock_wait: config.read_lock_wait,
            read_lock_poll: config.read_lock_poll,
        }
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    /// Plain read of a published value. Locks and absences read as `None`.
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        match self.read_slot(key).await? {
            CacheSlot::Value(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Plain write, ignoring any lock on the slot.
    pub async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) {
        let encoded = CacheSlot::Value(value.to_vec()).encode();
        if let Err(error) = self.backend.set(key, encoded, ttl.or(Some(self.value_ttl))).await {
            warn!(key, %error, "cache set failed");
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.get(key).await?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(key, %error, "cached value does not decode");
                None
            }
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.set(key, &bytes, ttl).await,
            Err(error) => warn!(key, %error, "value does not encode for caching"),
        }
    }

    /// Atomic counter, outside the lock protocol. `None` when the backend is
    /// unreachable.
    pub async fn increment_value(&self, key: &str, amount: i64) -> Option<i64> {
        match self.backend.incr(key, amount).await {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(key, %error, "cache increment failed");
                None
            }
        }
    }

    /// Current value of a counter maintained by [`Self::increment_value`].
    pub async fn counter(&self, key: &str) -> Option<i64> {
        match self.backend.get(key).await {
            Ok(raw) => raw?.parse().ok(),
            Err(error) => {
                warn!(key, %error, "cache get failed");
                None
            }
        }
    }

    /// Returns the cached value for `key`, producing and publishing it on a
    /// miss.
    ///
    /// `produce` runs at most once per call. Its error is returned as is;
    /// `Ok(None)` is cached as an absence.
    pub async fn caching_get<T, E, F, Fut>(&self, key: &str, produce: F) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        let token = match self.acquire_read_lock::<T>(key).await {
            ReadAttempt::Hit(value) => return Ok(value),
            ReadAttempt::Locked(token) => Some(token),
            ReadAttempt::Uncached => None,
        };

        let produced = produce().await;
        if let Some(token) = token {
            match &produced {
                Ok(value) => self.publish(key, &token, value.as_ref()).await,
                Err(_) => self.abandon_read_lock(key, &token).await,
            }
        }
        produced
    }

    /// Batched [`Self::caching_get`]. `produce` receives the keys that were not
    /// served from cache, in the order given, and must return their values
    /// aligned with them. The result is aligned with `keys`.
    ///
    /// Read locks for all empty slots are claimed in one transaction; there is
    /// no waiting on other readers' locks.
    pub async fn caching_get_multi<T, E, F, Fut>(&self, keys: &[String], produce: F) -> Result<Vec<Option<T>>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(Vec<String>) -> Fut,
        Fut: Future<Output = Result<Vec<Option<T>>, E>>,
    {
        let raws = match self.backend.mget(keys).await {
            Ok(raws) => raws,
            Err(error) => {
                warn!(keys = keys.len(), %error, "cache mget failed, reading through");
                vec![None; keys.len()]
            }
        };

        let mut resolved: Vec<Option<Option<T>>> = Vec::with_capacity(keys.len());
        let mut empty: Vec<usize> = Vec::new();
        for (position, (key, raw)) in keys.iter().zip(raws).enumerate() {
            let hit = match CacheSlot::decode_opt(raw.as_deref()) {
                Ok(Some(CacheSlot::Value(bytes))) => serde_json::from_slice(&bytes).ok().map(Some),
                Ok(Some(CacheSlot::Absent)) => Some(None),
                Ok(Some(_)) => None,
                Ok(None) => {
                    empty.push(position);
                    None
                }
                Err(error) => {
                    warn!(key, %error, "unreadable cache slot");
                    None
                }
            };
            resolved.push(hit);
        }

        let tokens = self.acquire_read_locks(keys, &empty).await;

        let missing: Vec<usize> = (0..keys.len()).filter(|&i| resolved[i].is_none()).collect();
        if missing.is_empty() {
            return Ok(resolved.into_iter().map(Option::flatten).collect());
        }
        let missing_keys: Vec<String> = missing.iter().map(|&i| keys[i].clone()).collect();

        let produced = match produce(missing_keys).await {
            Ok(produced) => produced,
            Err(error) => {
                for (position, token) in &tokens {
                    self.abandon_read_lock(&keys[*position], token).await;
                }
                return Err(error);
            }
        };

        let mut produced = produced.into_iter();
        for &position in &missing {
            let value = produced.next().flatten();
            if let Some((_, token)) = tokens.iter().find(|(p, _)| *p == position) {
                self.publish(&keys[position], token, value.as_ref()).await;
            }
            resolved[position] = Some(value);
        }

        Ok(resolved.into_iter().map(Option::flatten).collect())
    }

    /// Runs `f` while holding a write lock on every key in `keys`, then clears
    /// them so the next reader goes to the authoritative store.
    ///
    /// Reentrant: concurrent or nested writers add themselves to the holder
    /// set. The lock is released however `f` ends, including when this
    /// future is dropped mid-way.
    pub async fn lock_while_writing<T, F, Fut>(&self, keys: &[String], f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let keys: Vec<String> = keys.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect();
        let holder = HolderId::generate();

        if self.acquire_write_lock(&keys, &holder).await {
            trace!(%holder, keys = keys.len(), "write lock acquired");
        }
        let mut guard = WriteLockGuard {
            service: Some(self.clone()),
            keys: keys.clone(),
            holder: holder.clone(),
        };

        let output = f().await;

        guard.disarm();
        self.release_write_lock(&keys, &holder).await;
        output
    }

    async fn read_slot(&self, key: &str) -> Option<CacheSlot> {
        let raw = match self.backend.get(key).await {
            Ok(raw) => raw,
            Err(error) => {
                warn!(key, %error, "cache get failed");
                return None;
            }
        };
        match CacheSlot::decode_opt(raw.as_deref()) {
            Ok(slot) => slot,
            Err(error) => {
                warn!(key, %error, "unreadable cache slot");
                None
            }
        }
    }

    async fn acquire_read_lock<T: DeserializeOwned>(&self, key: &str) -> ReadAttempt<T> {
        let deadline = Instant::now() + self.read_lock_wait;
        loop {
            let raw = match self.backend.get(key).await {
                Ok(raw) => raw,
                Err(error) => {
                    warn!(key, %error, "cache get failed, reading through");
                    return ReadAttempt::Uncached;
                }
            };
            let slot = match CacheSlot::decode_opt(raw.as_deref()) {
                Ok(slot) => slot,
                Err(error) => {
                    warn!(key, %error, "unreadable cache slot");
                    return ReadAttempt::Uncached;
                }
            };

            match slot {
                Some(CacheSlot::Value(bytes)) => {
                    return match serde_json::from_slice(&bytes) {
                        Ok(value) => ReadAttempt::Hit(Some(value)),
                        Err(error) => {
                            warn!(key, %error, "cached value does not decode");
                            ReadAttempt::Uncached
                        }
                    };
                }
                Some(CacheSlot::Absent) => return ReadAttempt::Hit(None),
                Some(CacheSlot::WriteLock(_)) => {
                    debug!(key, "slot is write locked, reading through");
                    return ReadAttempt::Uncached;
                }
                Some(CacheSlot::ReadLock(_)) => {
                    if Instant::now() >= deadline {
                        debug!(key, "gave up waiting for another reader");
                        return ReadAttempt::Uncached;
                    }
                    tokio::time::sleep(self.read_lock_poll).await;
                }
                None => {
                    let token = LockToken::generate();
                    let watched = [Watched::new(key, None)];
                    let claim = CacheWrite::Set {
                        key: key.to_string(),
                        value: CacheSlot::ReadLock(token.clone()).encode(),
                        ttl: Some(self.lock_ttl),
                    };
                    match self.backend.commit_if_unchanged(&watched, vec![claim]).await {
                        Ok(true) => return ReadAttempt::Locked(token),
                        Ok(false) if Instant::now() >= deadline => return ReadAttempt::Uncached,
                        Ok(false) => trace!(key, "lost read lock race"),
                        Err(error) => {
                            warn!(key, %error, "read lock transaction failed");
                            return ReadAttempt::Uncached;
                        }
                    }
                }
            }
        }
    }

    /// Claims every empty slot at `positions` in one transaction. All or
    /// nothing: a concurrent change to any of them yields no tokens.
    async fn acquire_read_locks(&self, keys: &[String], positions: &[usize]) -> Vec<(usize, LockToken)> {
        if positions.is_empty() {
            return Vec::new();
        }
        let tokens: Vec<(usize, LockToken)> = positions.iter().map(|&p| (p, LockToken::generate())).collect();
        let watched: Vec<Watched> = positions.iter().map(|&p| Watched::new(&keys[p], None)).collect();
        let claims = tokens
            .iter()
            .map(|(p, token)| CacheWrite::Set {
                key: keys[*p].clone(),
                value: CacheSlot::ReadLock(token.clone()).encode(),
                ttl: Some(self.lock_ttl),
            })
            .collect();

        match self.backend.commit_if_unchanged(&watched, claims).await {
            Ok(true) => tokens,
            Ok(false) => {
                debug!(keys = positions.len(), "lost batched read lock race");
                Vec::new()
            }
            Err(error) => {
                warn!(%error, "batched read lock transaction failed");
                Vec::new()
            }
        }
    }

    async fn publish<T: Serialize>(&self, key: &str, token: &LockToken, value: Option<&T>) {
        let slot = match value.map(serde_json::to_vec).transpose() {
            Ok(Some(bytes)) => CacheSlot::Value(bytes),
            Ok(None) => CacheSlot::Absent,
            Err(error) => {
                warn!(key, %error, "value does not encode for caching");
                self.abandon_read_lock(key, token).await;
                return;
            }
        };
        let watched = [Watched::new(key, Some(CacheSlot::ReadLock(token.clone()).encode()))];
        let write = CacheWrite::Set {
            key: key.to_string(),
            value: slot.encode(),
            ttl: Some(self.value_ttl),
        };
        match self.backend.commit_if_unchanged(&watched, vec![write]).await {
            Ok(true) => trace!(key, "published"),
            Ok(false) => debug!(key, "slot changed since read lock, dropping value"),
            Err(error) => warn!(key, %error, "cache publish failed"),
        }
    }

    async fn abandon_read_lock(&self, key: &str, token: &LockToken) {
        let watched = [Watched::new(key, Some(CacheSlot::ReadLock(token.clone()).encode()))];
        let clear = CacheWrite::Delete { key: key.to_string() };
        if let Err(error) = self.backend.commit_if_unchanged(&watched, vec![clear]).await {
            warn!(key, %error, "failed to clear read lock");
        }
    }

    async fn acquire_write_lock(&self, keys: &[String], holder: &HolderId) -> bool {
        for attempt in 1..=MAX_LOCK_ATTEMPTS {
            let raws = match self.backend.mget(keys).await {
                Ok(raws) => raws,
                Err(error) => {
                    warn!(%error, "cache unavailable, writing without lock");
                    return false;
                }
            };

            let mut watched = Vec::with_capacity(keys.len());
            let mut writes = Vec::with_capacity(keys.len());
            for (key, raw) in keys.iter().zip(raws) {
                let slot = match CacheSlot::decode_opt(raw.as_deref()) {
                    Ok(Some(CacheSlot::WriteLock(mut holders))) => {
                        holders.insert(holder.clone());
                        CacheSlot::WriteLock(holders)
                    }
                    _ => CacheSlot::write_lock(holder.clone()),
                };
                writes.push(CacheWrite::Set {
                    key: key.clone(),
                    value: slot.encode(),
                    ttl: Some(self.lock_ttl),
                });
                watched.push(Watched::new(key, raw));
            }

            match self.backend.commit_if_unchanged(&watched, writes).await {
                Ok(true) => return true,
                Ok(false) => trace!(%holder, attempt, "write lock transaction raced, retrying"),
                Err(error) => {
                    warn!(%error, "write lock transaction failed");
                    return false;
                }
            }
        }
        warn!(%holder, "could not acquire write lock, writing without it");
        false
    }

    /// Removes `holder` from every key. Slots left without holders are
    /// cleared, as is anything cached over the key while the holder was not
    /// registered on it.
    pub(crate) async fn release_write_lock(&self, keys: &[String], holder: &HolderId) {
        for attempt in 1..=MAX_LOCK_ATTEMPTS {
            let raws = match self.backend.mget(keys).await {
                Ok(raws) => raws,
                Err(error) => {
                    warn!(%holder, %error, "cache unavailable, lock will expire with ttl");
                    return;
                }
            };

            let mut watched = Vec::with_capacity(keys.len());
            let mut writes = Vec::new();
            for (key, raw) in keys.iter().zip(raws) {
                match CacheSlot::decode_opt(raw.as_deref()) {
                    Ok(None) => {}
                    // A lock without this holder belongs to another writer,
                    // who clears the slot itself.
                    Ok(Some(CacheSlot::WriteLock(mut holders))) => {
                        if holders.remove(holder) {
                            if holders.is_empty() {
                                writes.push(CacheWrite::Delete { key: key.clone() });
                            } else {
                                writes.push(CacheWrite::Set {
                                    key: key.clone(),
                                    value: CacheSlot::WriteLock(holders).encode(),
                                    ttl: Some(self.lock_ttl),
                                });
                            }
                        }
                    }
                    Ok(Some(_)) | Err(_) => writes.push(CacheWrite::Delete { key: key.clone() }),
                }
                watched.push(Watched::new(key, raw));
            }

            if writes.is_empty() {
                return;
            }
            match self.backend.commit_if_unchanged(&watched, writes).await {
                Ok(true) => {
                    trace!(%holder, "write lock released");
                    return;
                }
                Ok(false) => trace!(%holder, attempt, "write unlock raced, retrying"),
                Err(error) => {
                    warn!(%holder, %error, "write unlock failed, lock will expire with ttl");
                    return;
                }
            }
        }
        warn!(%holder, "could not release write lock, it will expire with ttl");
    }
}

/// Releases a write lock from a spawned task if `lock_while_writing` is
/// dropped before it can release it inline.
struct WriteLockGuard {
    service: Option<CacheConsistencyService>,
    keys: Vec<String>,
    holder: HolderId,
}

impl WriteLockGuard {
    fn disarm(&mut self) {
        self.service = None;
    }
}

impl Drop for WriteLockGuard {
    fn drop(&mut self) {
        let Some(service) = self.service.take() else {
            return;
        };
        let keys = std::mem::take(&mut self.keys);
        let holder = self.holder.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    service.release_write_lock(&keys, &holder).await;
                });
            }
            Err(_) => warn!(%holder, "write lock dropped outside a runtime, it will expire with ttl"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::cache::MemoryCacheBackend;

    fn service() -> (Arc<MemoryCacheBackend>, CacheConsistencyService) {
        let backend = Arc::new(MemoryCacheBackend::new());
        let service = CacheConsistencyService::new(backend.clone(), &RuntimeConfig::default());
        (backend, service)
    }

    #[tokio::test]
    async fn caching_get_publishes_and_then_hits() {
        let (backend, cache) = service();
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let produce = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ()>(Some(41u32))
        };

        assert_eq!(cache.caching_get("k", produce).await, Ok(Some(41)));
        assert_eq!(cache.caching_get("k", produce).await, Ok(Some(41)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(backend.peek("k").unwrap().starts_with("v:"));
    }

    #[tokio::test]
    async fn absence_is_cached() {
        let (backend, cache) = service();
        let first = cache.caching_get::<u32, (), _, _>("k", || async { Ok(None) }).await;
        assert_eq!(first, Ok(None));
        assert_eq!(backend.peek("k").as_deref(), Some("absent"));

        let second = cache.caching_get::<u32, (), _, _>("k", || async { Ok(Some(1)) }).await;
        assert_eq!(second, Ok(None));
    }

    #[tokio::test]
    async fn producer_error_clears_read_lock() {
        let (backend, cache) = service();
        let result = cache.caching_get::<u32, &str, _, _>("k", || async { Err("store down") }).await;
        assert_eq!(result, Err("store down"));
        assert_eq!(backend.peek("k"), None);
    }

    #[tokio::test]
    async fn write_locked_slot_is_read_through_without_caching() {
        let (backend, cache) = service();
        let holder = HolderId::generate();
        backend
            .set("k", CacheSlot::write_lock(holder).encode(), None)
            .await
            .unwrap();

        let value = cache.caching_get::<u32, (), _, _>("k", || async { Ok(Some(7)) }).await;
        assert_eq!(value, Ok(Some(7)));
        assert!(backend.peek("k").unwrap().starts_with("w:"));
    }

    #[tokio::test]
    async fn writer_overwrites_read_lock_and_reader_drops_value() {
        let (backend, cache) = service();
        let writer = cache.clone();
        let value = cache
            .caching_get::<u32, (), _, _>("k", move || async move {
                writer.lock_while_writing(&["k".to_string()], || async {}).await;
                Ok(Some(1))
            })
            .await;
        assert_eq!(value, Ok(Some(1)));
        assert_eq!(backend.peek("k"), None);
    }

    #[tokio::test]
    async fn lock_is_reentrant_and_released_by_last_holder() {
        let (backend, cache) = service();
        let keys = vec!["k".to_string()];
        let inner = cache.clone();
        let inner_keys = keys.clone();
        let outer_backend = backend.clone();
        cache
            .lock_while_writing(&keys, move || async move {
                let held_outer = outer_backend.peek("k").unwrap();
                let inner_backend = outer_backend.clone();
                inner
                    .lock_while_writing(&inner_keys, move || async move {
                        let held_both = CacheSlot::decode(&inner_backend.peek("k").unwrap()).unwrap();
                        assert!(matches!(held_both, CacheSlot::WriteLock(h) if h.len() == 2));
                    })
                    .await;
                assert_eq!(outer_backend.peek("k").unwrap(), held_outer);
            })
            .await;
        assert_eq!(backend.peek("k"), None);
    }

    #[tokio::test]
    async fn get_multi_serves_hits_and_produces_misses() {
        let (_, cache) = service();
        cache.set_json("a", &1u32, None).await;
        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];

        let values = cache
            .caching_get_multi::<u32, (), _, _>(&keys, |missing| async move {
                assert_eq!(missing, vec!["b".to_string(), "c".to_string()]);
                Ok(vec![Some(2), None])
            })
            .await
            .unwrap();
        assert_eq!(values, vec![Some(1), Some(2), None]);

        let again = cache
            .caching_get_multi::<u32, (), _, _>(&keys, |missing| async move {
                assert!(missing.is_empty(), "everything was published");
                Ok(Vec::new())
            })
            .await
            .unwrap();
        assert_eq!(again, vec![Some(1), Some(2), None]);
    }

    #[tokio::test]
    async fn outage_degrades_to_producing() {
        let (backend, cache) = service();
        backend.set_available(false);

        let value = cache.caching_get::<u32, (), _, _>("k", || async { Ok(Some(3)) }).await;
        assert_eq!(value, Ok(Some(3)));
        let written = cache.lock_while_writing(&["k".to_string()], || async { 5 }).await;
        assert_eq!(written, 5);
        assert_eq!(cache.increment_value("n", 1).await, None);
    }
}
