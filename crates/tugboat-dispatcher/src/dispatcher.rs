//! The dispatch loop: one task at a time, stage by stage.

use crate::{ClusterBackend, DispatchError, StatusTracker, Task};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tugboat_core::{Status, TaskSpec};

const STATUS_SEND_TIMEOUT: Duration = Duration::from_millis(250);

/// Provisions cluster resources for rendered task specs, strictly
/// sequentially.
///
/// One task's failure never halts the pipeline: the failure is recorded,
/// a terminal status is emitted, and the loop moves on. Resources created
/// before a failure are left in place for operator inspection.
pub struct TaskDispatcher {
    backend: Arc<dyn ClusterBackend>,
    tracker: Arc<StatusTracker>,
    /// Tolerate a pre-existing namespace instead of failing the task.
    overwrite_namespaces: bool,
    /// Wait budget for a pre-existing namespace to finish deleting.
    delete_wait: Duration,
    /// Storage request for the per-task workspace volume.
    volume_size: String,
}

impl TaskDispatcher {
    pub fn new(backend: Arc<dyn ClusterBackend>, tracker: Arc<StatusTracker>) -> Self {
        Self {
            backend,
            tracker,
            overwrite_namespaces: false,
            delete_wait: Duration::from_secs(30),
            volume_size: "1Gi".to_string(),
        }
    }

    pub fn overwrite_namespaces(mut self, overwrite: bool) -> Self {
        self.overwrite_namespaces = overwrite;
        self
    }

    pub fn delete_wait(mut self, wait: Duration) -> Self {
        self.delete_wait = wait;
        self
    }

    pub fn volume_size(mut self, size: impl Into<String>) -> Self {
        self.volume_size = size.into();
        self
    }

    /// Run the single-consumer loop until `tasks` is exhausted or shutdown is
    /// signalled. Dropping `status` on return closes the status channel.
    ///
    /// Shutdown is honored at the top of the receive loop; an in-flight
    /// task's cluster operations are left to complete.
    pub async fn run(
        self,
        mut shutdown: watch::Receiver<bool>,
        mut tasks: mpsc::Receiver<TaskSpec>,
        status: mpsc::Sender<Status>,
    ) {
        info!(backend = self.backend.name(), "Dispatcher started");

        loop {
            let spec = tokio::select! {
                _ = shutdown.changed() => break,
                spec = tasks.recv() => match spec {
                    Some(spec) => spec,
                    None => break,
                },
            };

            self.tracker.record(spec.id, spec.clone());
            self.provision(spec, &status).await;
        }

        info!("Dispatcher stopped");
    }

    async fn provision(&self, spec: TaskSpec, status: &mpsc::Sender<Status>) {
        let mut task = Task::new(spec);
        let namespace = task.spec.namespace.clone();
        let id = task.spec.id;

        self.emit(
            status,
            Status::info(id, format!("provisioning task in namespace {namespace}")),
        )
        .await;

        // Best-effort cleanup of leftovers from a previous failed run.
        if let Err(e) = self.backend.delete_namespace(&namespace, self.delete_wait).await {
            warn!(namespace = %namespace, error = %e, "Pre-delete of namespace failed");
            self.emit(
                status,
                Status::warning(id, format!("pre-delete of namespace failed: {e}")),
            )
            .await;
        }

        match self.run_stages(&mut task, status).await {
            Ok(()) => {
                self.emit(
                    status,
                    Status::completed(id, format!("job {} submitted", task.spec.job_name())),
                )
                .await;
            }
            Err(e) => {
                warn!(task = %id, namespace = %namespace, error = %e, "Task provisioning failed");
                // Created resources are left in place for inspection.
                let message = format!("provisioning failed: {e}");
                task.fail(e);
                self.emit(status, Status::failed(id, message)).await;
            }
        }
    }

    async fn run_stages(
        &self,
        task: &mut Task,
        status: &mpsc::Sender<Status>,
    ) -> Result<(), DispatchError> {
        let id = task.spec.id;
        let namespace = task.spec.namespace.clone();

        match self.backend.create_namespace(&namespace).await {
            Ok(()) => {
                self.emit(status, Status::info(id, format!("namespace {namespace} created")))
                    .await;
            }
            Err(DispatchError::NamespaceExists(_)) if self.overwrite_namespaces => {
                self.emit(
                    status,
                    Status::warning(id, format!("reusing existing namespace {namespace}")),
                )
                .await;
            }
            Err(e) => return Err(e),
        }

        for secret in &task.spec.secrets {
            self.backend
                .create_secret(&namespace, secret)
                .await
                .map_err(|e| DispatchError::stage("secret create", e))?;
            self.emit(
                status,
                Status::info(
                    id,
                    format!("secret {} created", secret.metadata.name.as_deref().unwrap_or("?")),
                ),
            )
            .await;
        }

        for service in &task.spec.services {
            self.backend
                .create_service(&namespace, service)
                .await
                .map_err(|e| DispatchError::stage("service create", e))?;
            self.emit(
                status,
                Status::info(
                    id,
                    format!("service {} created", service.metadata.name.as_deref().unwrap_or("?")),
                ),
            )
            .await;
        }

        let volume = format!("{namespace}-workspace");
        self.backend
            .create_workspace_volume(&namespace, &volume, &self.volume_size)
            .await
            .map_err(|e| DispatchError::stage("workspace volume", e))?;
        task.volume_name = Some(volume.clone());
        self.emit(status, Status::info(id, format!("volume {volume} allocated")))
            .await;

        self.backend
            .submit_job(&namespace, &task.spec.job)
            .await
            .map_err(|e| DispatchError::stage("job submit", e))?;

        Ok(())
    }

    /// Send a status with a short timeout; a stalled consumer must never
    /// block dispatch indefinitely, so on timeout the record goes to the
    /// local log instead.
    async fn emit(&self, status: &mpsc::Sender<Status>, record: Status) {
        if let Err(e) = status.send_timeout(record, STATUS_SEND_TIMEOUT).await {
            match e {
                mpsc::error::SendTimeoutError::Timeout(record) => {
                    warn!(task = %record.task_id, message = %record.message, "status consumer stalled, logging locally");
                }
                mpsc::error::SendTimeoutError::Closed(record) => {
                    info!(task = %record.task_id, message = %record.message, "status channel closed, logging locally");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use k8s_openapi::api::batch::v1::Job;
    use k8s_openapi::api::core::v1::{Secret, Service};
    use kube::api::ObjectMeta;
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tugboat_core::TaskId;

    /// Records every backend call; namespaces in `taken` collide on create,
    /// and `fail_volume` makes the workspace volume stage error.
    #[derive(Default)]
    struct MockBackend {
        calls: Mutex<Vec<String>>,
        taken: HashSet<String>,
        fail_volume: bool,
    }

    impl MockBackend {
        fn with_taken(namespaces: &[&str]) -> Self {
            Self {
                taken: namespaces.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }
        }

        fn failing_volume() -> Self {
            Self {
                fail_volume: true,
                ..Default::default()
            }
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ClusterBackend for MockBackend {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn delete_namespace(&self, name: &str, _wait: Duration) -> Result<(), DispatchError> {
            self.record(format!("delete_namespace {name}"));
            Ok(())
        }

        async fn create_namespace(&self, name: &str) -> Result<(), DispatchError> {
            self.record(format!("create_namespace {name}"));
            if self.taken.contains(name) {
                return Err(DispatchError::NamespaceExists(name.to_string()));
            }
            Ok(())
        }

        async fn create_secret(
            &self,
            namespace: &str,
            secret: &Secret,
        ) -> Result<(), DispatchError> {
            self.record(format!(
                "create_secret {namespace}/{}",
                secret.metadata.name.as_deref().unwrap_or("?")
            ));
            Ok(())
        }

        async fn create_service(
            &self,
            namespace: &str,
            service: &Service,
        ) -> Result<(), DispatchError> {
            self.record(format!(
                "create_service {namespace}/{}",
                service.metadata.name.as_deref().unwrap_or("?")
            ));
            Ok(())
        }

        async fn create_workspace_volume(
            &self,
            namespace: &str,
            name: &str,
            _size: &str,
        ) -> Result<(), DispatchError> {
            self.record(format!("create_workspace_volume {namespace}/{name}"));
            if self.fail_volume {
                return Err(DispatchError::Cluster(kube::Error::Api(
                    kube::error::ErrorResponse {
                        status: "Failure".to_string(),
                        message: "persistentvolumeclaims is forbidden".to_string(),
                        reason: "Forbidden".to_string(),
                        code: 403,
                    },
                )));
            }
            Ok(())
        }

        async fn submit_job(&self, namespace: &str, job: &Job) -> Result<(), DispatchError> {
            self.record(format!(
                "submit_job {namespace}/{}",
                job.metadata.name.as_deref().unwrap_or("?")
            ));
            Ok(())
        }
    }

    fn named(name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    fn task_spec(namespace: &str) -> TaskSpec {
        TaskSpec {
            id: TaskId::new(),
            namespace: namespace.to_string(),
            source_dir: PathBuf::from("/work/x"),
            env: Default::default(),
            job: Job {
                metadata: named("build"),
                ..Default::default()
            },
            secrets: vec![Secret {
                metadata: named("creds"),
                ..Default::default()
            }],
            services: vec![Service {
                metadata: named("cache"),
                ..Default::default()
            }],
        }
    }

    async fn dispatch(
        backend: Arc<MockBackend>,
        overwrite: bool,
        specs: Vec<TaskSpec>,
    ) -> Vec<Status> {
        let tracker = Arc::new(StatusTracker::new());
        let dispatcher = TaskDispatcher::new(backend, tracker).overwrite_namespaces(overwrite);

        let (task_tx, task_rx) = mpsc::channel(specs.len().max(1));
        let (status_tx, mut status_rx) = mpsc::channel(64);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        for spec in specs {
            task_tx.send(spec).await.unwrap();
        }
        drop(task_tx);

        dispatcher.run(shutdown_rx, task_rx, status_tx).await;

        let mut statuses = Vec::new();
        while let Some(s) = status_rx.recv().await {
            statuses.push(s);
        }
        statuses
    }

    #[tokio::test]
    async fn provisions_all_stages_in_order() {
        let backend = Arc::new(MockBackend::default());
        let statuses = dispatch(backend.clone(), false, vec![task_spec("ns-a")]).await;

        assert_eq!(
            backend.calls(),
            vec![
                "delete_namespace ns-a",
                "create_namespace ns-a",
                "create_secret ns-a/creds",
                "create_service ns-a/cache",
                "create_workspace_volume ns-a/ns-a-workspace",
                "submit_job ns-a/build",
            ]
        );

        let terminal = statuses.last().unwrap();
        assert!(terminal.is_terminal());
        assert!(!terminal.is_failure());
    }

    #[tokio::test]
    async fn namespace_collision_without_overwrite_fails_before_secrets() {
        let backend = Arc::new(MockBackend::with_taken(&["ns-b"]));
        let statuses = dispatch(backend.clone(), false, vec![task_spec("ns-b")]).await;

        let calls = backend.calls();
        assert!(!calls.iter().any(|c| c.starts_with("create_secret")));
        assert!(!calls.iter().any(|c| c.starts_with("create_service")));
        assert!(!calls.iter().any(|c| c.starts_with("submit_job")));

        let terminal = statuses.last().unwrap();
        assert!(terminal.is_failure());
    }

    #[tokio::test]
    async fn namespace_collision_with_overwrite_proceeds() {
        let backend = Arc::new(MockBackend::with_taken(&["ns-c"]));
        let statuses = dispatch(backend.clone(), true, vec![task_spec("ns-c")]).await;

        assert!(backend.calls().iter().any(|c| c == "submit_job ns-c/build"));
        assert!(!statuses.last().unwrap().is_failure());
    }

    #[tokio::test]
    async fn one_failed_task_does_not_halt_the_next() {
        let backend = Arc::new(MockBackend::with_taken(&["ns-bad"]));
        let bad = task_spec("ns-bad");
        let good = task_spec("ns-good");
        let (bad_id, good_id) = (bad.id, good.id);

        let statuses = dispatch(backend.clone(), false, vec![bad, good]).await;

        assert!(backend.calls().iter().any(|c| c == "submit_job ns-good/build"));

        // Strictly sequential: every status for the first task precedes every
        // status for the second, and each task ends with a terminal status.
        let last_bad = statuses.iter().rposition(|s| s.task_id == bad_id).unwrap();
        let first_good = statuses.iter().position(|s| s.task_id == good_id).unwrap();
        assert!(last_bad < first_good);
        assert!(statuses[last_bad].is_failure());
        assert!(statuses.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn volume_failure_names_the_stage_and_skips_the_job() {
        let backend = Arc::new(MockBackend::failing_volume());
        let statuses = dispatch(backend.clone(), false, vec![task_spec("ns-v")]).await;

        assert!(!backend.calls().iter().any(|c| c.starts_with("submit_job")));

        let terminal = statuses.last().unwrap();
        assert!(terminal.is_failure());
        assert!(terminal.message.contains("workspace volume"));
    }

    #[tokio::test]
    async fn status_channel_closes_when_tasks_are_exhausted() {
        let backend = Arc::new(MockBackend::default());
        // dispatch() only returns once status_rx yields None, which proves
        // the sender was dropped at loop exit.
        let statuses = dispatch(backend, false, vec![]).await;
        assert!(statuses.is_empty());
    }

    #[tokio::test]
    async fn tracker_retains_specs_for_enrichment() {
        let backend = Arc::new(MockBackend::default());
        let tracker = Arc::new(StatusTracker::new());
        let dispatcher = TaskDispatcher::new(backend, tracker.clone());

        let spec = task_spec("ns-t");
        let id = spec.id;

        let (task_tx, task_rx) = mpsc::channel(1);
        let (status_tx, mut status_rx) = mpsc::channel(64);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        task_tx.send(spec).await.unwrap();
        drop(task_tx);

        dispatcher.run(shutdown_rx, task_rx, status_tx).await;
        while status_rx.recv().await.is_some() {}

        assert_eq!(tracker.lookup(id).unwrap().namespace, "ns-t");
    }
}
