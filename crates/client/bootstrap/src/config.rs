//! Session configuration structures and loaders.
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use runtime::RuntimeConfig;

/// Configuration needed to stand up a local server and attach clients to it.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub server: RuntimeConfig,
    pub sync: SyncConfig,
    pub session_id: Option<String>,
    pub log_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(RuntimeConfig::default(), SyncConfig::default())
    }
}

impl SessionConfig {
    pub const fn new(server: RuntimeConfig, sync: SyncConfig) -> Self {
        Self {
            server,
            sync,
            session_id: None,
            log_dir: None,
        }
    }

    /// Construct configuration from process environment variables.
    ///
    /// Environment variables:
    /// - `CHUNK_SIZE` - Actions per stored chunk (default: 200)
    /// - `LOCK_TTL_SECS` - Cache lock expiry (default: 32)
    /// - `CACHE_TTL_SECS` - Cached value expiry (default: 3600)
    /// - `APPEND_RETRY_ATTEMPTS` - Attempts per append on collision (default: 3)
    /// - `SYNC_TAIL_WINDOW` - Actions returned by an out-of-sync check (default: 20)
    /// - `SYNC_BUFFER` - Command and push queue size per client (default: 32)
    /// - `HISTORY_STEP_MS` - Autoplay interval in history mode (default: 400)
    /// - `GAME_SESSION_ID` - Session identifier for log files (default: auto-generated)
    /// - `LOG_DIR` - Directory for session logs (default: platform cache dir)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(size) = read_env::<u64>("CHUNK_SIZE") {
            config.server.chunk_size = size.max(1);
        }
        if let Some(secs) = read_env::<u64>("LOCK_TTL_SECS") {
            config.server.lock_ttl = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = read_env::<u64>("CACHE_TTL_SECS") {
            config.server.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(attempts) = read_env::<u32>("APPEND_RETRY_ATTEMPTS") {
            config.server.append_retry_attempts = attempts.max(1);
        }
        if let Some(window) = read_env::<u64>("SYNC_TAIL_WINDOW") {
            config.server.sync_tail_window = window;
        }

        if let Some(capacity) = read_env::<usize>("SYNC_BUFFER") {
            config.sync.buffer = capacity.max(1);
        }
        if let Some(millis) = read_env::<u64>("HISTORY_STEP_MS") {
            config.sync.history_step = Duration::from_millis(millis.max(1));
        }

        config.session_id = env::var("GAME_SESSION_ID").ok();
        config.log_dir = env::var("LOG_DIR").ok().map(PathBuf::from);

        config
    }
}

#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub buffer: usize,
    pub history_step: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            buffer: 32,
            history_step: Duration::from_millis(400),
        }
    }
}

fn read_env<T>(key: &str) -> Option<T>
where
    T: std::str::FromStr,
{
    env::var(key).ok()?.parse().ok()
}
