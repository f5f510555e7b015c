//! Runtime task state.

use crate::DispatchError;
use tugboat_core::TaskSpec;

/// Runtime wrapper around one [`TaskSpec`] during provisioning.
///
/// Created when a spec is dequeued, destroyed when provisioning completes or
/// fails; never reused.
pub struct Task {
    pub spec: TaskSpec,
    /// First provisioning failure. Later failures for the same task are not
    /// recorded; remaining stages are skipped after the first.
    pub first_error: Option<DispatchError>,
    /// Workspace volume claim name once allocated.
    pub volume_name: Option<String>,
}

impl Task {
    pub fn new(spec: TaskSpec) -> Self {
        Self {
            spec,
            first_error: None,
            volume_name: None,
        }
    }

    /// Record a failure, keeping only the first.
    pub fn fail(&mut self, err: DispatchError) {
        if self.first_error.is_none() {
            self.first_error = Some(err);
        }
    }

    pub fn failed(&self) -> bool {
        self.first_error.is_some()
    }
}
