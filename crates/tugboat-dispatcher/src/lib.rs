//! Cluster resource provisioning for tugboat tasks.
//!
//! The [`TaskDispatcher`] consumes rendered task specs one at a time and
//! provisions their resources (namespace, secrets, services, workspace
//! volume, job) against a [`ClusterBackend`]. The production backend talks
//! to Kubernetes through a single shared client; tests substitute a mock.

pub mod backend;
pub mod dispatcher;
pub mod error;
pub mod kubernetes;
pub mod task;
pub mod tracker;

pub use backend::ClusterBackend;
pub use dispatcher::TaskDispatcher;
pub use error::DispatchError;
pub use kubernetes::KubernetesBackend;
pub use task::Task;
pub use tracker::StatusTracker;
