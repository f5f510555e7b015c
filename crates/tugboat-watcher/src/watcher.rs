//! The change watcher: registration set plus the single polling loop.

use crate::{RepoStateStore, RepositoryPoller, WatchError, repo_key};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};
use tugboat_core::{Change, RepoSpec};

const EVENT_CHANNEL_CAPACITY: usize = 32;
const EVENT_SEND_TIMEOUT: Duration = Duration::from_millis(250);

/// Out-of-band events from the polling loop, consumed via [`ChangeWatcher::events`].
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// A repository failed to poll this tick. It is retried on the next tick;
    /// there is no backoff beyond the fixed cadence.
    PollFailed { url: String, message: String },
    /// A change was delivered but the new hash could not be persisted, so the
    /// same change will be redelivered on the next tick.
    PersistFailed { url: String, message: String },
}

/// One registered repository. Immutable after registration; cloned as a value
/// snapshot each tick so no lock is held across network I/O.
#[derive(Clone)]
struct Registration {
    spec: RepoSpec,
    token: Option<String>,
    notify: mpsc::Sender<Change>,
}

enum PollOutcome {
    NoChange,
    Delivered,
    /// Shutdown fired while blocked on delivery; abandon the tick.
    Interrupted,
}

/// Watches a set of registered repositories for new commits.
///
/// A single background loop polls every registered repository sequentially on
/// a fixed cadence; the first tick fires almost immediately so configuration
/// errors surface quickly. Explicitly constructed and caller-owned; there is
/// no process-wide instance.
pub struct ChangeWatcher {
    inner: Arc<Inner>,
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
    events_rx: Mutex<Option<mpsc::Receiver<WatchEvent>>>,
    owned_dir: Mutex<Option<TempDir>>,
}

struct Inner {
    poll_interval: Duration,
    state_dir: PathBuf,
    store: RepoStateStore,
    repos: Mutex<HashMap<String, Registration>>,
    events: mpsc::Sender<WatchEvent>,
}

impl ChangeWatcher {
    /// Create a watcher polling at `poll_interval`.
    ///
    /// With `state_dir = Some(dir)` the caller owns the directory and it must
    /// already exist. With `None` the watcher allocates a scratch directory
    /// and removes it on [`stop`](Self::stop).
    pub fn new(poll_interval: Duration, state_dir: Option<PathBuf>) -> Result<Self, WatchError> {
        let (state_dir, owned_dir) = match state_dir {
            Some(dir) => {
                if !dir.is_dir() {
                    return Err(WatchError::InvalidStateDir(dir));
                }
                (dir, None)
            }
            None => {
                let tmp = TempDir::with_prefix("tugboat-watch-")
                    .map_err(WatchError::TempAllocation)?;
                (tmp.path().to_path_buf(), Some(tmp))
            }
        };

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(Inner {
                poll_interval,
                store: RepoStateStore::new(&state_dir),
                state_dir,
                repos: Mutex::new(HashMap::new()),
                events: events_tx,
            }),
            shutdown_tx,
            handle: Mutex::new(None),
            events_rx: Mutex::new(Some(events_rx)),
            owned_dir: Mutex::new(owned_dir),
        })
    }

    /// Register a repository. It becomes eligible for polling at the next tick.
    ///
    /// Fails when the URL is already tracked or the notification channel has
    /// no live receiver.
    pub fn add(
        &self,
        spec: RepoSpec,
        token: Option<String>,
        notify: mpsc::Sender<Change>,
    ) -> Result<(), WatchError> {
        if notify.is_closed() {
            return Err(WatchError::ClosedChannel(spec.url));
        }

        let mut repos = self.inner.repos.lock().unwrap();
        if repos.contains_key(&spec.url) {
            return Err(WatchError::DuplicateRepo(spec.url));
        }

        info!(repo = %spec.url, branch = %spec.branch, "Watching repository");
        repos.insert(spec.url.clone(), Registration { spec, token, notify });
        Ok(())
    }

    /// Take the out-of-band event receiver. Yields `Some` exactly once.
    pub fn events(&self) -> Option<mpsc::Receiver<WatchEvent>> {
        self.events_rx.lock().unwrap().take()
    }

    pub fn state_dir(&self) -> &Path {
        &self.inner.state_dir
    }

    /// Spawn the polling loop. Calling twice is a no-op.
    pub fn start(&self) {
        let mut handle = self.handle.lock().unwrap();
        if handle.is_some() {
            return;
        }

        let inner = self.inner.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        *handle = Some(tokio::spawn(run_loop(inner, shutdown_rx)));
    }

    /// Signal the polling loop to halt and wait up to `grace` for the
    /// in-flight tick to finish.
    ///
    /// Returns `true` for an orderly shutdown, `false` when the grace period
    /// elapsed and the loop was forcibly aborted. A watcher-owned scratch
    /// directory is removed either way.
    pub async fn stop(&self, grace: Duration) -> bool {
        let _ = self.shutdown_tx.send(true);

        let handle = self.handle.lock().unwrap().take();
        let orderly = match handle {
            None => true,
            Some(mut h) => match time::timeout(grace, &mut h).await {
                Ok(_) => true,
                Err(_) => {
                    warn!("polling loop did not stop within grace period, aborting");
                    h.abort();
                    false
                }
            },
        };

        let owned = self.owned_dir.lock().unwrap().take();
        if let Some(tmp) = owned {
            if let Err(e) = tmp.close() {
                warn!(error = %e, "failed to remove scratch state directory");
            }
        }

        orderly
    }
}

async fn run_loop(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    // The first tick fires immediately; later ticks follow the cadence even
    // when a tick overruns the interval.
    let mut ticker = time::interval(inner.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                if !inner.tick(&mut shutdown).await {
                    break;
                }
            }
        }
    }

    debug!("polling loop stopped");
}

impl Inner {
    /// One pass over all registered repositories. Returns `false` when
    /// shutdown fired mid-tick.
    async fn tick(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let repos: Vec<Registration> = {
            let repos = self.repos.lock().unwrap();
            repos.values().cloned().collect()
        };

        debug!(repos = repos.len(), "polling tick");

        for reg in repos {
            if *shutdown.borrow() {
                return false;
            }

            match self.poll_one(&reg, shutdown).await {
                Ok(PollOutcome::Interrupted) => return false,
                Ok(_) => {}
                Err(e) => {
                    // Skip this repository for the tick; it is retried on the
                    // next cadence.
                    self.report(WatchEvent::PollFailed {
                        url: reg.spec.url.clone(),
                        message: e.to_string(),
                    })
                    .await;
                }
            }
        }

        true
    }

    async fn poll_one(
        &self,
        reg: &Registration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<PollOutcome, WatchError> {
        let poller = RepositoryPoller::new(reg.spec.clone(), reg.token.clone(), &self.state_dir);
        let tip = poller.sync().await?;

        let key = repo_key(&reg.spec.url);
        if self.store.read(&key).await.as_deref() == Some(tip.as_str()) {
            return Ok(PollOutcome::NoChange);
        }

        let change = Change {
            source_url: reg.spec.url.clone(),
            local_dir: poller.checkout_dir().to_path_buf(),
            commit: tip.clone(),
        };
        info!(repo = %reg.spec.url, commit = %change.short_commit(), "Change detected");

        // Blocking send: a slow consumer stalls the watcher rather than
        // silently dropping a change.
        tokio::select! {
            res = reg.notify.send(change) => {
                if res.is_err() {
                    return Err(WatchError::ClosedChannel(reg.spec.url.clone()));
                }
            }
            _ = shutdown.changed() => return Ok(PollOutcome::Interrupted),
        }

        // Persist only after delivery. A failed write leaves the old record in
        // place, so the change is redelivered on the next tick.
        if let Err(source) = self.store.write(&key, &tip).await {
            let e = WatchError::State {
                url: reg.spec.url.clone(),
                source,
            };
            self.report(WatchEvent::PersistFailed {
                url: reg.spec.url.clone(),
                message: e.to_string(),
            })
            .await;
        }

        Ok(PollOutcome::Delivered)
    }

    async fn report(&self, event: WatchEvent) {
        if let Err(e) = self.events.send_timeout(event, EVENT_SEND_TIMEOUT).await {
            warn!(event = ?e, "watch event dropped, no consumer keeping up");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(url: &str) -> RepoSpec {
        RepoSpec::new(url, "main")
    }

    #[tokio::test]
    async fn missing_caller_supplied_dir_is_rejected() {
        let err = ChangeWatcher::new(
            Duration::from_secs(60),
            Some(PathBuf::from("/nonexistent/tugboat-state")),
        )
        .err()
        .unwrap();
        assert!(matches!(err, WatchError::InvalidStateDir(_)));
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected_and_first_wins() {
        let watcher = ChangeWatcher::new(Duration::from_secs(60), None).unwrap();
        let (tx1, _rx1) = mpsc::channel(1);
        let (tx2, _rx2) = mpsc::channel(1);

        watcher
            .add(repo("https://example.com/r.git"), Some("tok".into()), tx1)
            .unwrap();
        let err = watcher
            .add(repo("https://example.com/r.git"), None, tx2)
            .err()
            .unwrap();
        assert!(matches!(err, WatchError::DuplicateRepo(_)));

        // First registration untouched.
        let repos = watcher.inner.repos.lock().unwrap();
        let reg = repos.get("https://example.com/r.git").unwrap();
        assert_eq!(reg.token.as_deref(), Some("tok"));
        assert_eq!(reg.spec.branch, "main");
    }

    #[tokio::test]
    async fn closed_notification_channel_is_rejected() {
        let watcher = ChangeWatcher::new(Duration::from_secs(60), None).unwrap();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let err = watcher
            .add(repo("https://example.com/r.git"), None, tx)
            .err()
            .unwrap();
        assert!(matches!(err, WatchError::ClosedChannel(_)));
    }

    #[tokio::test]
    async fn stop_without_start_is_orderly() {
        let watcher = ChangeWatcher::new(Duration::from_secs(60), None).unwrap();
        assert!(watcher.stop(Duration::from_millis(100)).await);
    }

    #[tokio::test]
    async fn stop_removes_owned_scratch_dir() {
        let watcher = ChangeWatcher::new(Duration::from_secs(60), None).unwrap();
        let dir = watcher.state_dir().to_path_buf();
        assert!(dir.is_dir());

        watcher.start();
        assert!(watcher.stop(Duration::from_secs(5)).await);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn caller_supplied_dir_survives_stop() {
        let tmp = tempfile::tempdir().unwrap();
        let watcher =
            ChangeWatcher::new(Duration::from_secs(60), Some(tmp.path().to_path_buf())).unwrap();

        watcher.start();
        assert!(watcher.stop(Duration::from_secs(5)).await);
        assert!(tmp.path().is_dir());
    }

    #[tokio::test]
    async fn events_receiver_is_yielded_once() {
        let watcher = ChangeWatcher::new(Duration::from_secs(60), None).unwrap();
        assert!(watcher.events().is_some());
        assert!(watcher.events().is_none());
    }
}
