//! Typed decoding of rendered manifest documents.

use crate::RenderError;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Secret, Service};
use serde::Deserialize;
use serde_yaml::Value;

/// One decoded manifest document, discriminated by its `kind` field.
///
/// Only the resource kinds the dispatcher knows how to provision are
/// representable; anything else fails the render.
#[derive(Debug, Clone)]
pub enum Manifest {
    Job(Box<Job>),
    Secret(Box<Secret>),
    Service(Box<Service>),
}

impl Manifest {
    pub fn kind(&self) -> &'static str {
        match self {
            Manifest::Job(_) => "Job",
            Manifest::Secret(_) => "Secret",
            Manifest::Service(_) => "Service",
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Manifest::Job(j) => j.metadata.name.as_deref(),
            Manifest::Secret(s) => s.metadata.name.as_deref(),
            Manifest::Service(s) => s.metadata.name.as_deref(),
        }
    }

    fn from_value(value: Value) -> Result<Self, RenderError> {
        let kind = value
            .get("kind")
            .and_then(Value::as_str)
            .ok_or(RenderError::MissingKind)?
            .to_string();

        match kind.as_str() {
            "Job" => Ok(Manifest::Job(Box::new(serde_yaml::from_value(value)?))),
            "Secret" => Ok(Manifest::Secret(Box::new(serde_yaml::from_value(value)?))),
            "Service" => Ok(Manifest::Service(Box::new(serde_yaml::from_value(value)?))),
            other => Err(RenderError::UnsupportedKind(other.to_string())),
        }
    }
}

/// Decode every non-empty document of a multi-document YAML stream.
pub fn decode_documents(yaml: &str) -> Result<Vec<Manifest>, RenderError> {
    let mut manifests = Vec::new();

    for document in serde_yaml::Deserializer::from_str(yaml) {
        let value = Value::deserialize(document)?;
        if matches!(value, Value::Null) {
            continue;
        }
        manifests.push(Manifest::from_value(value)?);
    }

    Ok(manifests)
}
