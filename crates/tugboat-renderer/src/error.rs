//! Renderer error types.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to read template {path}: {source}")]
    Template {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown template variable ${{{0}}}")]
    UnknownVariable(String),

    #[error("invalid manifest YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("manifest document has no kind field")]
    MissingKind,

    #[error("unsupported manifest kind: {0}")]
    UnsupportedKind(String),

    #[error("{0} manifest has no metadata.name")]
    MissingName(&'static str),

    #[error("rendered output contains no Job manifest")]
    NoJob,

    #[error("rendered output contains more than one Job manifest")]
    MultipleJobs,
}
