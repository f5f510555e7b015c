//! Manifest template rendering for tugboat.
//!
//! Turns a detected [`Change`](tugboat_core::Change) into a fully validated
//! [`TaskSpec`](tugboat_core::TaskSpec): interpolates change and environment
//! metadata into a manifest template, decodes the rendered YAML into typed
//! cluster resources, and checks the result before it reaches the dispatcher.

pub mod context;
pub mod engine;
pub mod error;
pub mod manifest;

pub use context::{RegistryEndpoint, RenderContext};
pub use engine::JobRenderer;
pub use error::RenderError;
pub use manifest::Manifest;
