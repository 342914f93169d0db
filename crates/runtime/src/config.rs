//! Server-side tuning knobs.

use std::time::Duration;

use thiserror::Error;

/// Configuration shared by the cache layer, the log store and the request
/// handlers.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Capacity of one action chunk.
    pub chunk_size: u64,
    /// Expiry of read and write lock slots, bounding how long a crashed
    /// holder can keep a key uncached.
    pub lock_ttl: Duration,
    /// Expiry of published cache values.
    pub cache_ttl: Duration,
    /// How long a reader waits for another reader's in-flight value.
    pub read_lock_wait: Duration,
    pub read_lock_poll: Duration,
    /// Attempts per append before an index collision is surfaced.
    pub append_retry_attempts: u32,
    /// Tail length returned by an out-of-sync check.
    pub sync_tail_window: u64,
    pub event_buffer_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            chunk_size: 200,
            lock_ttl: Duration::from_secs(32),
            cache_ttl: Duration::from_secs(60 * 60),
            read_lock_wait: Duration::from_millis(250),
            read_lock_poll: Duration::from_millis(10),
            append_retry_attempts: 3,
            sync_tail_window: 20,
            event_buffer_size: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("chunk_size must be at least 1")]
    ZeroChunkSize,

    #[error("append_retry_attempts must be at least 1")]
    ZeroRetryAttempts,

    #[error("lock_ttl must be non-zero")]
    ZeroLockTtl,

    #[error("read_lock_poll must be non-zero when read_lock_wait is set")]
    ZeroPollInterval,

    #[error("event_buffer_size must be at least 1")]
    ZeroEventBuffer,
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if self.append_retry_attempts == 0 {
            return Err(ConfigError::ZeroRetryAttempts);
        }
        if self.lock_ttl.is_zero() {
            return Err(ConfigError::ZeroLockTtl);
        }
        if !self.read_lock_wait.is_zero() && self.read_lock_poll.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.event_buffer_size == 0 {
            return Err(ConfigError::ZeroEventBuffer);
        }
        Ok(())
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}
