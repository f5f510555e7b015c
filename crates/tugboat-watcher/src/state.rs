//! Durable last-seen commit state, one plain file per repository.

use std::io;
use std::path::{Path, PathBuf};

/// Persists the last-observed commit hash for each watched repository.
///
/// Layout: `<state_dir>/<key>.head`, containing the raw hash text. Writes are
/// whole-file overwrites; a truncated or garbled file reads back as "no prior
/// state", which causes a spurious redelivery of the current head rather than
/// losing work.
#[derive(Debug, Clone)]
pub struct RepoStateStore {
    dir: PathBuf,
}

impl RepoStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the state file for a repository key.
    pub fn head_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.head"))
    }

    /// Read the recorded hash for a repository, if any.
    ///
    /// Missing, unreadable, or empty files all read as `None`.
    pub async fn read(&self, key: &str) -> Option<String> {
        let raw = tokio::fs::read_to_string(self.head_path(key)).await.ok()?;
        let hash = raw.trim();
        if hash.is_empty() || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        Some(hash.to_string())
    }

    /// Record a new hash for a repository, replacing any previous value.
    pub async fn write(&self, key: &str, hash: &str) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.head_path(key), hash).await
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
