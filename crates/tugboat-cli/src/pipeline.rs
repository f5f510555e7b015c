//! Runtime wiring: watcher -> renderer -> dispatcher -> status consumer.

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tugboat_core::{RepoSpec, Severity, Status, TaskSpec};
use tugboat_dispatcher::{KubernetesBackend, StatusTracker, TaskDispatcher};
use tugboat_renderer::JobRenderer;
use tugboat_watcher::{ChangeWatcher, WatchEvent};

const CHANGE_CHANNEL_CAPACITY: usize = 16;
const TASK_CHANNEL_CAPACITY: usize = 8;
const STATUS_CHANNEL_CAPACITY: usize = 64;

pub struct Config {
    pub repos: Vec<String>,
    pub template: PathBuf,
    pub interval: Duration,
    pub state_dir: Option<PathBuf>,
    pub token: Option<String>,
    pub overwrite_namespaces: bool,
    pub volume_size: String,
    pub grace: Duration,
}

/// Run the pipeline until SIGINT/SIGTERM, then shut down within the grace
/// period. Returns the process exit code: 0 on clean run, 1 when any task
/// failed terminally, 2 when shutdown had to be forced.
pub async fn run(config: Config) -> anyhow::Result<i32> {
    let specs = config
        .repos
        .iter()
        .map(|s| RepoSpec::parse(s))
        .collect::<Result<Vec<_>, _>>()
        .context("invalid repository registration")?;

    let watcher = ChangeWatcher::new(config.interval, config.state_dir)?;
    let (change_tx, mut change_rx) = mpsc::channel(CHANGE_CHANNEL_CAPACITY);
    for spec in specs {
        watcher.add(spec, config.token.clone(), change_tx.clone())?;
    }
    drop(change_tx);

    let mut watch_events = watcher
        .events()
        .context("watch event receiver already taken")?;

    let renderer = JobRenderer::new(&config.template).with_env(std::env::vars().collect());
    let backend = Arc::new(
        KubernetesBackend::new()
            .await
            .context("failed to connect to the cluster")?,
    );
    let tracker = Arc::new(StatusTracker::new());
    let dispatcher = TaskDispatcher::new(backend, tracker.clone())
        .overwrite_namespaces(config.overwrite_namespaces)
        .volume_size(config.volume_size);

    let (task_tx, task_rx) = mpsc::channel::<TaskSpec>(TASK_CHANNEL_CAPACITY);
    let (status_tx, mut status_rx) = mpsc::channel::<Status>(STATUS_CHANNEL_CAPACITY);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    watcher.start();
    let dispatch_handle = tokio::spawn(dispatcher.run(shutdown_rx, task_rx, status_tx));

    // Changes become tasks; a render failure drops the change (it will not be
    // redelivered: the watcher already persisted the hash) but never stops
    // the pipeline.
    let render_handle = tokio::spawn(async move {
        while let Some(change) = change_rx.recv().await {
            match renderer.render(&change) {
                Ok(spec) => {
                    if task_tx.send(spec).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!(repo = %change.source_url, error = %e, "Render failed, change dropped");
                }
            }
        }
    });

    // Out-of-band watcher failures go to the operator log.
    let events_handle = tokio::spawn(async move {
        while let Some(event) = watch_events.recv().await {
            match event {
                WatchEvent::PollFailed { url, message } => {
                    warn!(repo = %url, message = %message, "Poll failed, retrying next tick");
                }
                WatchEvent::PersistFailed { url, message } => {
                    warn!(repo = %url, message = %message, "State write failed, change will be redelivered");
                }
            }
        }
    });

    // Status consumer: enrich each record from the tracker and count terminal
    // failures for the exit code.
    let status_tracker = tracker.clone();
    let status_handle = tokio::spawn(async move {
        let mut failures: u32 = 0;
        while let Some(status) = status_rx.recv().await {
            let spec = status_tracker.lookup(status.task_id);
            let namespace = spec
                .as_ref()
                .map(|s| s.namespace.clone())
                .unwrap_or_default();
            let source = spec
                .as_ref()
                .map(|s| s.source_dir.display().to_string())
                .unwrap_or_default();

            match status.severity {
                Severity::Info => {
                    info!(task = %status.task_id, namespace = %namespace, source = %source, "{}", status.message)
                }
                Severity::Warning => {
                    warn!(task = %status.task_id, namespace = %namespace, source = %source, "{}", status.message)
                }
                Severity::Error => {
                    error!(task = %status.task_id, namespace = %namespace, source = %source, "{}", status.message)
                }
            }

            if status.is_failure() {
                failures += 1;
            }
        }
        failures
    });

    shutdown_signal().await;
    info!("Shutdown signal received");

    let orderly = watcher.stop(config.grace).await;
    if !orderly {
        warn!(grace_secs = config.grace.as_secs(), "Forced watcher shutdown after grace period");
    }
    let _ = shutdown_tx.send(true);
    // Dropping the watcher releases the registered notification senders so
    // the render loop sees end-of-stream.
    drop(watcher);

    render_handle.await.context("render loop panicked")?;
    events_handle.await.context("event loop panicked")?;
    dispatch_handle.await.context("dispatch loop panicked")?;
    let failures = status_handle.await.context("status loop panicked")?;

    if failures > 0 {
        warn!(failures, "Run finished with failed tasks");
    }

    Ok(if !orderly {
        2
    } else if failures > 0 {
        1
    } else {
        0
    })
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
