//! Task records and the task state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Task lifecycle state.
///
/// Transitions follow:
///
/// ```text
/// queued → running → succeeded
///                  → failed → retrying → running (until max_retries)
///                  → canceling → canceled
/// queued → canceled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Accepted, waiting for a worker slot.
    Queued,
    /// A worker is executing the task.
    Running,
    /// Finished successfully; result stored.
    Succeeded,
    /// Failed terminally.
    Failed,
    /// Waiting out the backoff before the next attempt.
    Retrying,
    /// Cancellation requested; the worker checks cooperatively.
    Canceling,
    /// Cancellation finished.
    Canceled,
}

impl TaskState {
    /// Returns whether the state is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    /// Returns whether `self → next` is a legal transition.
    #[must_use]
    pub const fn can_transition(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running | Self::Canceled)
                | (
                    Self::Running,
                    Self::Succeeded | Self::Failed | Self::Retrying | Self::Canceling
                )
                | (Self::Retrying, Self::Running | Self::Canceled)
                | (Self::Canceling, Self::Canceled)
        )
    }

    /// Returns the canonical snake_case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
            Self::Canceling => "canceling",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broker-owned record of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Unique task id.
    pub task_id: String,
    /// Task name (e.g. `ingest:doc-1`, `segment:doc-1:3`).
    pub name: String,
    /// Queue the task was submitted on.
    pub queue: String,
    /// Current state.
    pub state: TaskState,
    /// Attempts started so far.
    pub attempts: u32,
    /// Unix timestamp of the first attempt start.
    pub started_at: Option<i64>,
    /// Unix timestamp of reaching a terminal state.
    pub finished_at: Option<i64>,
    /// Key of the stored result, when one exists.
    pub result_ref: Option<String>,
    /// Error message for failed/canceled tasks.
    pub error: Option<String>,
}

impl TaskRecord {
    /// Creates a queued record.
    #[must_use]
    pub fn new(task_id: String, name: &str, queue: &str) -> Self {
        Self {
            task_id,
            name: name.to_string(),
            queue: queue.to_string(),
            state: TaskState::Queued,
            attempts: 0,
            started_at: None,
            finished_at: None,
            result_ref: None,
            error: None,
        }
    }
}

/// Per-task options applied at submit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskOptions {
    /// Maximum retry attempts after the first failure.
    pub max_retries: u32,
    /// Soft time limit in seconds; raised cooperatively.
    pub soft_time_limit: u64,
    /// Hard time limit in seconds; the attempt is aborted.
    pub hard_time_limit: u64,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            soft_time_limit: 540,
            hard_time_limit: 600,
        }
    }
}

impl TaskOptions {
    /// Creates options with no retries.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_retries: 0,
            soft_time_limit: 540,
            hard_time_limit: 600,
        }
    }

    /// Sets the retry budget.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the soft and hard time limits.
    #[must_use]
    pub const fn with_time_limits(mut self, soft_secs: u64, hard_secs: u64) -> Self {
        self.soft_time_limit = soft_secs;
        self.hard_time_limit = hard_secs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        use TaskState::{Canceled, Canceling, Failed, Queued, Retrying, Running, Succeeded};

        assert!(Queued.can_transition(Running));
        assert!(Queued.can_transition(Canceled));
        assert!(Running.can_transition(Succeeded));
        assert!(Running.can_transition(Failed));
        assert!(Running.can_transition(Retrying));
        assert!(Running.can_transition(Canceling));
        assert!(Retrying.can_transition(Running));
        assert!(Retrying.can_transition(Canceled));
        assert!(Canceling.can_transition(Canceled));
    }

    #[test]
    fn test_illegal_transitions() {
        use TaskState::{Canceled, Failed, Queued, Running, Succeeded};

        assert!(!Succeeded.can_transition(Running));
        assert!(!Failed.can_transition(Running));
        assert!(!Canceled.can_transition(Queued));
        assert!(!Queued.can_transition(Succeeded));
        assert!(!Running.can_transition(Canceled)); // must pass canceling
    }

    #[test]
    fn test_terminal_states() {
        assert!(TaskState::Succeeded.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Canceled.is_terminal());
        assert!(!TaskState::Retrying.is_terminal());
        assert!(!TaskState::Canceling.is_terminal());
    }

    #[test]
    fn test_record_new() {
        let record = TaskRecord::new("t-1".to_string(), "ingest:doc", "default");
        assert_eq!(record.state, TaskState::Queued);
        assert_eq!(record.attempts, 0);
        assert!(record.result_ref.is_none());
    }

    #[test]
    fn test_options_builders() {
        let opts = TaskOptions::no_retry().with_time_limits(5, 10);
        assert_eq!(opts.max_retries, 0);
        assert_eq!(opts.soft_time_limit, 5);
        assert_eq!(opts.hard_time_limit, 10);
    }
}
