//! Per-repository synchronization against the remote.

use crate::{WatchError, repo_key};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};
use tugboat_core::RepoSpec;

/// Synchronizes one repository's local working copy and resolves the current
/// tip of its tracked branch.
///
/// The working copy lives at `<state_dir>/<key>/` where `key` is the
/// deterministic hash of the clone URL, so the same directory is reused
/// across restarts. The poller is the only component that touches it.
#[derive(Debug, Clone)]
pub struct RepositoryPoller {
    spec: RepoSpec,
    token: Option<String>,
    checkout_dir: PathBuf,
}

impl RepositoryPoller {
    pub fn new(spec: RepoSpec, token: Option<String>, state_dir: &Path) -> Self {
        let checkout_dir = state_dir.join(repo_key(&spec.url));
        Self {
            spec,
            token,
            checkout_dir,
        }
    }

    pub fn checkout_dir(&self) -> &Path {
        &self.checkout_dir
    }

    pub fn spec(&self) -> &RepoSpec {
        &self.spec
    }

    /// Bring the working copy up to date with the remote and return the full
    /// hash of the remote-tracking branch tip.
    ///
    /// Clone-if-absent, then fetch, force-checkout the tracked branch, and
    /// fast-forward pull. The checkout is left at the returned commit.
    pub async fn sync(&self) -> Result<String, WatchError> {
        if !self.checkout_dir.exists() {
            self.clone_repo().await?;
        } else {
            self.run_git("fetch", &["fetch", "origin"], Some(&self.checkout_dir))
                .await?;
        }

        let remote_ref = format!("origin/{}", self.spec.branch);
        let tip = self
            .run_git(
                "rev-parse",
                &["rev-parse", &remote_ref],
                Some(&self.checkout_dir),
            )
            .await?
            .trim()
            .to_string();

        self.run_git(
            "checkout",
            &["checkout", "--force", &self.spec.branch],
            Some(&self.checkout_dir),
        )
        .await?;

        // Tolerate "already up to date" so an unchanged remote is not an error.
        if let Err(e) = self
            .run_git(
                "pull",
                &["pull", "--ff-only", "origin", &self.spec.branch],
                Some(&self.checkout_dir),
            )
            .await
        {
            match &e {
                WatchError::Git { message, .. }
                    if message.to_ascii_lowercase().contains("already up to date") =>
                {
                    debug!(repo = %self.spec.url, "Already up to date");
                }
                _ => return Err(e),
            }
        }

        Ok(tip)
    }

    async fn clone_repo(&self) -> Result<(), WatchError> {
        if let Some(parent) = self.checkout_dir.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        info!(repo = %self.spec.url, path = %self.checkout_dir.display(), "Cloning repository");

        let auth_url = self.auth_url();
        let dir = self.checkout_dir.to_string_lossy().to_string();
        self.run_git(
            "clone",
            &[
                "clone",
                "--branch",
                &self.spec.branch,
                "--single-branch",
                &auth_url,
                &dir,
            ],
            None,
        )
        .await?;

        Ok(())
    }

    /// Build the clone URL with the access token spliced in:
    /// `https://github.com/o/r.git` -> `https://<token>@github.com/o/r.git`.
    fn auth_url(&self) -> String {
        match (&self.token, self.spec.url.strip_prefix("https://")) {
            (Some(token), Some(rest)) => format!("https://{token}@{rest}"),
            _ => self.spec.url.clone(),
        }
    }

    async fn run_git(
        &self,
        op: &'static str,
        args: &[&str],
        cwd: Option<&Path>,
    ) -> Result<String, WatchError> {
        let mut cmd = Command::new("git");
        cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let output = cmd.output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // The message may contain the auth URL; never leak the token.
            warn!(repo = %self.spec.url, op, "git operation failed");
            return Err(WatchError::Git {
                op,
                url: self.spec.url.clone(),
                message: self.redact(&stderr),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn redact(&self, text: &str) -> String {
        match &self.token {
            Some(token) if !token.is_empty() => text.replace(token, "[REDACTED]"),
            _ => text.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poller(url: &str, token: Option<&str>) -> RepositoryPoller {
        RepositoryPoller::new(
            RepoSpec::new(url, "main"),
            token.map(String::from),
            Path::new("/tmp/state"),
        )
    }

    #[test]
    fn auth_url_splices_token_into_https_urls() {
        let p = poller("https://example.com/r.git", Some("sekrit"));
        assert_eq!(p.auth_url(), "https://sekrit@example.com/r.git");
    }

    #[test]
    fn auth_url_leaves_other_schemes_alone() {
        let p = poller("git@example.com:o/r.git", Some("sekrit"));
        assert_eq!(p.auth_url(), "git@example.com:o/r.git");
    }

    #[test]
    fn redact_strips_token_from_errors() {
        let p = poller("https://example.com/r.git", Some("sekrit"));
        assert_eq!(
            p.redact("fatal: https://sekrit@example.com/r.git not found"),
            "fatal: https://[REDACTED]@example.com/r.git not found"
        );
    }

    #[test]
    fn checkout_dir_is_stable_per_url() {
        let a = poller("https://example.com/r.git", None);
        let b = poller("https://example.com/r.git", None);
        assert_eq!(a.checkout_dir(), b.checkout_dir());
    }
}
