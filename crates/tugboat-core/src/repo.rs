//! Repository registration specs.
//!
//! Repositories are registered from `<url>[^<branch>]` strings; the caret
//! segment is optional and the branch defaults to "master" when absent.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Branch assumed when a registration string carries no `^<branch>` segment.
pub const DEFAULT_BRANCH: &str = "master";

/// A repository to watch: clone URL plus tracked branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSpec {
    /// Clone URL of the repository.
    pub url: String,
    /// Branch whose tip is tracked for changes.
    pub branch: String,
}

impl RepoSpec {
    pub fn new(url: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            branch: branch.into(),
        }
    }

    /// Parse a `<url>[^<branch>]` registration string.
    pub fn parse(input: &str) -> Result<Self, RepoSpecError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(RepoSpecError::EmptyUrl);
        }

        match input.split_once('^') {
            Some((url, branch)) => {
                if url.is_empty() {
                    return Err(RepoSpecError::EmptyUrl);
                }
                if branch.is_empty() {
                    return Err(RepoSpecError::EmptyBranch(url.to_string()));
                }
                Ok(Self::new(url, branch))
            }
            None => Ok(Self::new(input, DEFAULT_BRANCH)),
        }
    }
}

impl std::str::FromStr for RepoSpec {
    type Err = RepoSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for RepoSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}^{}", self.url, self.branch)
    }
}

/// Errors parsing a repository registration string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RepoSpecError {
    #[error("repository URL is empty")]
    EmptyUrl,

    #[error("branch segment after '^' is empty for {0}")]
    EmptyBranch(String),
}
