//! File logging for client sessions.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Platform cache directory for session logs.
///
/// Falls back to `/tmp/tabletop/logs` when no home directory is known.
pub fn log_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "tabletop")
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("/tmp/tabletop"))
        .join("logs")
}

/// Routes tracing output to `<dir>/<session>/client.log`. Returns the
/// session directory.
pub fn setup_logging(session_id: Option<&str>, dir: Option<&Path>) -> Result<PathBuf> {
    let session_id = session_id
        .map(str::to_owned)
        .unwrap_or_else(|| format!("session_{}", chrono::Utc::now().format("%Y%m%d_%H%M%S")));
    let session_dir = dir.map_or_else(log_dir, Path::to_path_buf).join(&session_id);
    std::fs::create_dir_all(&session_dir)
        .with_context(|| format!("creating log directory {}", session_dir.display()))?;

    let file_appender = tracing_appender::rolling::never(&session_dir, "client.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    // The writer must outlive every log call in the process.
    std::mem::forget(guard);

    tracing::info!(session = %session_id, "logging initialized");
    tracing::info!("log file: {}/client.log", session_dir.display());
    Ok(session_dir)
}
