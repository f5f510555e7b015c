//! Core domain types for the tugboat dispatch pipeline.
//!
//! This crate contains:
//! - Task identifiers
//! - Repository registration specs and the `<url>[^<branch>]` input format
//! - Change events produced by the watcher
//! - Task specifications handed to the dispatcher
//! - Status records emitted during provisioning

pub mod change;
pub mod id;
pub mod repo;
pub mod status;
pub mod task;

pub use change::Change;
pub use id::TaskId;
pub use repo::{RepoSpec, RepoSpecError};
pub use status::{Severity, Status};
pub use task::TaskSpec;
