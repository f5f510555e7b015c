//! Task specifications.

use crate::TaskId;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Secret, Service};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// The fully rendered description of cluster resources to provision for one
/// change: exactly one Job plus any Secrets and Services it depends on, all
/// placed in a dedicated namespace.
///
/// Owned exclusively by the dispatcher once submitted; immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Globally unique task identifier.
    pub id: TaskId,
    /// Namespace every resource of this task is created in.
    pub namespace: String,
    /// Local source directory the task was rendered from.
    pub source_dir: PathBuf,
    /// Environment metadata captured at render time.
    pub env: HashMap<String, String>,
    /// The job to submit.
    pub job: Job,
    /// Secrets created before the job.
    pub secrets: Vec<Secret>,
    /// Services created before the job.
    pub services: Vec<Service>,
}

impl TaskSpec {
    /// Name of the job manifest, for logging.
    pub fn job_name(&self) -> &str {
        self.job.metadata.name.as_deref().unwrap_or("<unnamed>")
    }
}
