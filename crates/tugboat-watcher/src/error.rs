//! Watcher error types.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("state directory does not exist: {0}")]
    InvalidStateDir(PathBuf),

    #[error("failed to allocate scratch state directory: {0}")]
    TempAllocation(#[source] std::io::Error),

    #[error("repository already registered: {0}")]
    DuplicateRepo(String),

    #[error("notification channel for {0} is closed")]
    ClosedChannel(String),

    #[error("git {op} failed for {url}: {message}")]
    Git {
        op: &'static str,
        url: String,
        message: String,
    },

    #[error("state write for {url} failed: {source}")]
    State {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
