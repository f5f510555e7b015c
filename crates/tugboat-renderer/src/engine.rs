//! The renderer: template in, validated TaskSpec out.

use crate::RenderError;
use crate::context::{RegistryEndpoint, RenderContext};
use crate::manifest::{Manifest, decode_documents};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info};
use tugboat_core::{Change, TaskId, TaskSpec};

/// Renders a manifest template into a [`TaskSpec`] for one change.
///
/// The template is read per render so edits take effect without a restart.
/// The rendered stream must contain exactly one Job; Secrets and Services are
/// optional companions. Every manifest must carry a `metadata.name`.
pub struct JobRenderer {
    template_path: PathBuf,
    env: HashMap<String, String>,
    registry: Option<RegistryEndpoint>,
}

impl JobRenderer {
    /// Create a renderer for the given template, probing the environment for
    /// a container registry.
    pub fn new(template_path: impl Into<PathBuf>) -> Self {
        Self {
            template_path: template_path.into(),
            env: HashMap::new(),
            registry: RegistryEndpoint::detect(),
        }
    }

    /// Environment values exposed to the template as `${env.NAME}`.
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Override the probed registry endpoint.
    pub fn with_registry(mut self, registry: Option<RegistryEndpoint>) -> Self {
        self.registry = registry;
        self
    }

    /// Render the template for `change` and validate the result.
    pub fn render(&self, change: &Change) -> Result<TaskSpec, RenderError> {
        let template = std::fs::read_to_string(&self.template_path).map_err(|source| {
            RenderError::Template {
                path: self.template_path.clone(),
                source,
            }
        })?;

        let task_id = TaskId::new();
        let namespace = format!("tugboat-{}", task_id.short());
        let ctx = RenderContext::new(
            change,
            task_id,
            &namespace,
            self.env.clone(),
            self.registry.clone(),
        );

        let rendered = ctx.interpolate(&template)?;
        let manifests = decode_documents(&rendered)?;
        debug!(task = %task_id, manifests = manifests.len(), "Decoded rendered manifests");

        let mut job = None;
        let mut secrets = Vec::new();
        let mut services = Vec::new();

        for manifest in manifests {
            if manifest.name().is_none() {
                return Err(RenderError::MissingName(manifest.kind()));
            }
            match manifest {
                Manifest::Job(j) => {
                    if job.is_some() {
                        return Err(RenderError::MultipleJobs);
                    }
                    job = Some(*j);
                }
                Manifest::Secret(s) => secrets.push(*s),
                Manifest::Service(s) => services.push(*s),
            }
        }

        let job = job.ok_or(RenderError::NoJob)?;

        let spec = TaskSpec {
            id: task_id,
            namespace,
            source_dir: change.local_dir.clone(),
            env: self.env.clone(),
            job,
            secrets,
            services,
        };
        info!(
            task = %spec.id,
            namespace = %spec.namespace,
            job = %spec.job_name(),
            secrets = spec.secrets.len(),
            services = spec.services.len(),
            "Rendered task"
        );

        Ok(spec)
    }
}
