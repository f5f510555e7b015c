//! Status records emitted during task provisioning.

use crate::TaskId;
use serde::{Deserialize, Serialize};

/// Severity of a status record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// One status update for a task. Ephemeral: consumed from the status channel,
/// never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    pub task_id: TaskId,
    pub severity: Severity,
    pub message: String,
    /// A terminal status means the task will receive no further updates.
    pub terminal: bool,
}

impl Status {
    pub fn info(task_id: TaskId, message: impl Into<String>) -> Self {
        Self {
            task_id,
            severity: Severity::Info,
            message: message.into(),
            terminal: false,
        }
    }

    pub fn warning(task_id: TaskId, message: impl Into<String>) -> Self {
        Self {
            task_id,
            severity: Severity::Warning,
            message: message.into(),
            terminal: false,
        }
    }

    /// Terminal success: provisioning completed, no further updates follow.
    pub fn completed(task_id: TaskId, message: impl Into<String>) -> Self {
        Self {
            task_id,
            severity: Severity::Info,
            message: message.into(),
            terminal: true,
        }
    }

    /// Terminal failure: the task was abandoned, no further updates follow.
    pub fn failed(task_id: TaskId, message: impl Into<String>) -> Self {
        Self {
            task_id,
            severity: Severity::Error,
            message: message.into(),
            terminal: true,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    pub fn is_failure(&self) -> bool {
        self.terminal && matches!(self.severity, Severity::Error)
    }
}
