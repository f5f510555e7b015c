//! In-memory task bookkeeping.

use std::collections::HashMap;
use std::sync::Mutex;
use tugboat_core::{TaskId, TaskSpec};

/// Maps task identifiers to their specs for the lifetime of the process.
///
/// Written by the dispatch loop and read by the status consumer, which uses
/// it to enrich status lines with namespace and source directory. Guarded by
/// a mutex; pure bookkeeping, never errors.
#[derive(Default)]
pub struct StatusTracker {
    tasks: Mutex<HashMap<TaskId, TaskSpec>>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, id: TaskId, spec: TaskSpec) {
        self.tasks.lock().unwrap().insert(id, spec);
    }

    pub fn lookup(&self, id: TaskId) -> Option<TaskSpec> {
        self.tasks.lock().unwrap().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::Job;
    use std::path::PathBuf;

    fn spec(id: TaskId) -> TaskSpec {
        TaskSpec {
            id,
            namespace: "ns".into(),
            source_dir: PathBuf::from("/work/x"),
            env: Default::default(),
            job: Job::default(),
            secrets: vec![],
            services: vec![],
        }
    }

    #[test]
    fn record_then_lookup() {
        let tracker = StatusTracker::new();
        let id = TaskId::new();
        tracker.record(id, spec(id));

        let found = tracker.lookup(id).unwrap();
        assert_eq!(found.namespace, "ns");
        assert!(tracker.lookup(TaskId::new()).is_none());
    }

    #[test]
    fn records_are_kept_for_process_lifetime() {
        let tracker = StatusTracker::new();
        for _ in 0..3 {
            let id = TaskId::new();
            tracker.record(id, spec(id));
        }
        assert_eq!(tracker.len(), 3);
    }
}
