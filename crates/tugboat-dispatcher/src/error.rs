//! Dispatcher error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("namespace {0} already exists")]
    NamespaceExists(String),

    #[error("namespace {name} still terminating after {waited_secs}s")]
    DeleteTimeout { name: String, waited_secs: u64 },

    #[error("cluster API error: {0}")]
    Cluster(#[from] kube::Error),

    #[error("{stage} failed: {message}")]
    Stage {
        stage: &'static str,
        message: String,
    },
}

impl DispatchError {
    /// Attach the name of the provisioning stage that produced an error.
    pub fn stage(stage: &'static str, source: impl std::fmt::Display) -> Self {
        Self::Stage {
            stage,
            message: source.to_string(),
        }
    }
}
