//! Variable interpolation for manifest templates.
//!
//! Supported variables:
//! - `${change.sha}` - Full commit hash of the detected change
//! - `${change.short_sha}` - Short (7 char) commit hash
//! - `${change.url}` - Source repository URL
//! - `${change.dir}` - Local working copy directory
//! - `${task.id}` - Task identifier
//! - `${task.namespace}` - Namespace the task is provisioned into
//! - `${env.NAME}` - Environment value captured at render time
//! - `${registry.host}` - Container registry host
//! - `${registry.port}` - Container registry port

use crate::RenderError;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use tugboat_core::{Change, TaskId};

static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*\.[a-zA-Z_][a-zA-Z0-9_]*)\}").unwrap()
});

/// A container registry endpoint, for clusters that run their own registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEndpoint {
    pub host: String,
    pub port: String,
}

impl RegistryEndpoint {
    /// Probe the environment for a registry endpoint.
    ///
    /// `TUGBOAT_REGISTRY_HOST` / `TUGBOAT_REGISTRY_PORT` take precedence; when
    /// only `TUGBOAT_LOCAL_CLUSTER` is set, the conventional single-node
    /// cluster registry at `localhost:5000` is assumed.
    pub fn detect() -> Option<Self> {
        if let Ok(host) = std::env::var("TUGBOAT_REGISTRY_HOST") {
            let port = std::env::var("TUGBOAT_REGISTRY_PORT").unwrap_or_else(|_| "5000".into());
            return Some(Self { host, port });
        }
        if std::env::var("TUGBOAT_LOCAL_CLUSTER").is_ok() {
            return Some(Self {
                host: "localhost".into(),
                port: "5000".into(),
            });
        }
        None
    }
}

/// All variables available while rendering one task.
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub change_sha: String,
    pub change_url: String,
    pub change_dir: String,
    pub task_id: TaskId,
    pub namespace: String,
    pub env: HashMap<String, String>,
    pub registry: Option<RegistryEndpoint>,
}

impl RenderContext {
    pub fn new(
        change: &Change,
        task_id: TaskId,
        namespace: impl Into<String>,
        env: HashMap<String, String>,
        registry: Option<RegistryEndpoint>,
    ) -> Self {
        Self {
            change_sha: change.commit.clone(),
            change_url: change.source_url.clone(),
            change_dir: change.local_dir.to_string_lossy().to_string(),
            task_id,
            namespace: namespace.into(),
            env,
            registry,
        }
    }

    fn resolve(&self, name: &str) -> Option<String> {
        if let Some(var) = name.strip_prefix("env.") {
            return self.env.get(var).cloned();
        }

        match name {
            "change.sha" => Some(self.change_sha.clone()),
            "change.short_sha" => Some(self.change_sha.chars().take(7).collect()),
            "change.url" => Some(self.change_url.clone()),
            "change.dir" => Some(self.change_dir.clone()),
            "task.id" => Some(self.task_id.to_string()),
            "task.namespace" => Some(self.namespace.clone()),
            "registry.host" => self.registry.as_ref().map(|r| r.host.clone()),
            "registry.port" => self.registry.as_ref().map(|r| r.port.clone()),
            _ => None,
        }
    }

    /// Substitute every `${scope.name}` variable in `input`.
    ///
    /// Rendering is strict: a variable that cannot be resolved is an error,
    /// not a silent passthrough, so a bad template fails before anything
    /// reaches the cluster.
    pub fn interpolate(&self, input: &str) -> Result<String, RenderError> {
        let mut result = String::with_capacity(input.len());
        let mut last = 0;

        for caps in VAR_REGEX.captures_iter(input) {
            let whole = caps.get(0).unwrap();
            let name = &caps[1];
            let value = self
                .resolve(name)
                .ok_or_else(|| RenderError::UnknownVariable(name.to_string()))?;
            result.push_str(&input[last..whole.start()]);
            result.push_str(&value);
            last = whole.end();
        }
        result.push_str(&input[last..]);

        Ok(result)
    }
}
