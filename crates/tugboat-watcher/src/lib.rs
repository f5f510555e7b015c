//! Repository polling and change detection for tugboat.
//!
//! A [`ChangeWatcher`] owns a set of registered repositories and a single
//! polling loop. Each tick it synchronizes every local checkout with its
//! remote, compares the tracked branch tip against the last hash recorded in
//! the [`RepoStateStore`], and delivers a `Change` on the repository's
//! notification channel when they differ.

pub mod error;
pub mod poller;
pub mod state;
pub mod watcher;

pub use error::WatchError;
pub use poller::RepositoryPoller;
pub use state::RepoStateStore;
pub use watcher::{ChangeWatcher, WatchEvent};

use sha2::{Digest, Sha256};

/// Derive the stable on-disk key for a repository URL.
///
/// The key names both the state file (`<key>.head`) and the working copy
/// directory (`<key>/`), so it must be deterministic across restarts.
pub fn repo_key(url: &str) -> String {
    hex::encode(Sha256::digest(url.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_key_is_stable_and_distinct() {
        let a = repo_key("https://example.com/a.git");
        assert_eq!(a, repo_key("https://example.com/a.git"));
        assert_ne!(a, repo_key("https://example.com/b.git"));
        assert_eq!(a.len(), 64);
    }
}
