//! The cluster backend seam.

use crate::DispatchError;
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Secret, Service};
use std::time::Duration;

/// Trait over the cluster operations the dispatcher needs.
///
/// The production implementation is [`KubernetesBackend`](crate::KubernetesBackend);
/// tests substitute a recording mock.
#[async_trait]
pub trait ClusterBackend: Send + Sync {
    /// Name of this backend.
    fn name(&self) -> &'static str;

    /// Delete a namespace if it exists and wait up to `wait` for it to be
    /// gone. A missing namespace is not an error.
    async fn delete_namespace(&self, name: &str, wait: Duration) -> Result<(), DispatchError>;

    /// Create a namespace. Fails with
    /// [`DispatchError::NamespaceExists`] when the name is taken.
    async fn create_namespace(&self, name: &str) -> Result<(), DispatchError>;

    /// Create a secret in `namespace`.
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<(), DispatchError>;

    /// Create a service in `namespace`.
    async fn create_service(&self, namespace: &str, service: &Service)
    -> Result<(), DispatchError>;

    /// Create the task workspace volume claim in `namespace`.
    async fn create_workspace_volume(
        &self,
        namespace: &str,
        name: &str,
        size: &str,
    ) -> Result<(), DispatchError>;

    /// Submit a job to `namespace`. Returns once the API server has accepted
    /// the object; job completion is the cluster scheduler's concern.
    async fn submit_job(&self, namespace: &str, job: &Job) -> Result<(), DispatchError>;
}
