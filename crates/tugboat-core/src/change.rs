//! Change events.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A detected divergence between a repository's last-recorded commit and the
/// current tip of its tracked branch.
///
/// Delivery is at-least-once: if persisting the new hash fails after delivery,
/// the same change is redelivered on the next polling tick. Consumers must
/// treat changes as idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// Clone URL of the repository the change was observed in.
    pub source_url: String,
    /// Local working copy that is checked out at `commit`.
    pub local_dir: PathBuf,
    /// Full commit hash of the new branch tip.
    pub commit: String,
}

impl Change {
    /// Short (7 char) form of the commit hash.
    pub fn short_commit(&self) -> String {
        self.commit.chars().take(7).collect()
    }
}
