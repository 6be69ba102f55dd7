use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::SubscriberBuilder;

pub const LOG_ENV: &str = "PROCSUP_LOG";

/*
    @@@
    @logs_tracing();
    . Creates a daily-rotating log file (<log_dir>/procsup.log) and wraps it in a non-blocking writer.
    . Configures a tracing subscriber at the given level (with timestamps, thread IDs, and targets) on that writer.
    . Keeps the appender alive by returning the guard; installing a second global subscriber is an error.
*/
pub fn logs_tracing(log_dir: &Path, level: Level) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("cannot create log directory {}", log_dir.display()))?;
    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "procsup.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let subscriber = SubscriberBuilder::default()
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_level(true)
        .with_writer(non_blocking)
        .with_max_level(level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set global subscriber")?;
    Ok(guard)
}

/// Cloneable owner of the appender's [`WorkerGuard`].
///
/// Dropping the last clone flushes like the bare guard would; [`FlushGuard::flush`]
/// does it early, for paths that leave through `process::exit`.
#[derive(Clone)]
pub struct FlushGuard(Arc<Mutex<Option<WorkerGuard>>>);

impl FlushGuard {
    pub fn new(guard: WorkerGuard) -> Self {
        Self(Arc::new(Mutex::new(Some(guard))))
    }

    /// Writes out buffered lines and stops the writer thread. Later calls do nothing.
    pub fn flush(&self) {
        let guard = match self.0.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(guard);
    }
}

/// Level named by `PROCSUP_LOG`, `info` when unset or unrecognised.
pub fn level_from_env() -> Level {
    std::env::var(LOG_ENV)
        .ok()
        .and_then(|s| parse_level(&s))
        .unwrap_or(Level::INFO)
}

pub fn parse_level(s: &str) -> Option<Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}
