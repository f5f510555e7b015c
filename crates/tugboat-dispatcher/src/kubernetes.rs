//! Kubernetes backend implementation.

use crate::{ClusterBackend, DispatchError};
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{
    Namespace, PersistentVolumeClaim, PersistentVolumeClaimSpec, Secret, Service,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::Client;
use kube::api::{Api, DeleteParams, ObjectMeta, PostParams};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

const DELETE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Cluster backend over a single shared Kubernetes client.
///
/// The client is internally synchronized, so one handle serves every
/// provisioning call concurrently.
pub struct KubernetesBackend {
    client: Client,
}

impl KubernetesBackend {
    /// Connect using the ambient kubeconfig/in-cluster configuration.
    pub async fn new() -> Result<Self, DispatchError> {
        let client = Client::try_default().await?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn managed_meta(name: &str) -> ObjectMeta {
        let mut labels = BTreeMap::new();
        labels.insert(
            "app.kubernetes.io/managed-by".to_string(),
            "tugboat".to_string(),
        );
        ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..Default::default()
        }
    }
}

fn is_api_code(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == code)
}

#[async_trait]
impl ClusterBackend for KubernetesBackend {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    async fn delete_namespace(&self, name: &str, wait: Duration) -> Result<(), DispatchError> {
        let api: Api<Namespace> = Api::all(self.client.clone());

        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => debug!(namespace = %name, "Deleting pre-existing namespace"),
            Err(e) if is_api_code(&e, 404) => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        // Namespace deletion is asynchronous; poll until it is gone or the
        // wait budget runs out.
        let deadline = Instant::now() + wait;
        loop {
            match api.get(name).await {
                Err(e) if is_api_code(&e, 404) => return Ok(()),
                Err(e) => return Err(e.into()),
                Ok(_) if Instant::now() >= deadline => {
                    return Err(DispatchError::DeleteTimeout {
                        name: name.to_string(),
                        waited_secs: wait.as_secs(),
                    });
                }
                Ok(_) => sleep(DELETE_POLL_INTERVAL).await,
            }
        }
    }

    async fn create_namespace(&self, name: &str) -> Result<(), DispatchError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespace = Namespace {
            metadata: Self::managed_meta(name),
            ..Default::default()
        };

        match api.create(&PostParams::default(), &namespace).await {
            Ok(_) => {
                info!(namespace = %name, "Created namespace");
                Ok(())
            }
            Err(e) if is_api_code(&e, 409) => Err(DispatchError::NamespaceExists(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<(), DispatchError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), secret).await?;
        Ok(())
    }

    async fn create_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<(), DispatchError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), service).await?;
        Ok(())
    }

    async fn create_workspace_volume(
        &self,
        namespace: &str,
        name: &str,
        size: &str,
    ) -> Result<(), DispatchError> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        let mut requests = BTreeMap::new();
        requests.insert("storage".to_string(), Quantity(size.to_string()));

        let claim = PersistentVolumeClaim {
            metadata: Self::managed_meta(name),
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(requests),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        api.create(&PostParams::default(), &claim).await?;
        Ok(())
    }

    async fn submit_job(&self, namespace: &str, job: &Job) -> Result<(), DispatchError> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), job).await?;
        info!(
            namespace = %namespace,
            job = job.metadata.name.as_deref().unwrap_or("<unnamed>"),
            "Submitted job"
        );
        Ok(())
    }
}
