//! Issue-tracker port and adapters.
//!
//! The engine only ever talks to the tracker through [`IssueTracker`]. Adapters:
//! - [`JiraTracker`]: Jira-style REST v2 API over `reqwest`
//! - [`MemoryTracker`]: in-process tracker for tests and offline runs
//! - [`RetryingTracker`]: decorator applying a bounded [`RetryPolicy`] to transient failures

mod jira;
mod memory;
mod retry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use contentflow_shared::{Result, Task, WorkflowState};

pub use jira::{JiraOptions, JiraTracker};
pub use memory::{MemoryTracker, TrackerOp};
pub use retry::{MAX_RETRY_DELAY, RetryPolicy, RetryingTracker};

/// Status restriction for task discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    /// Any workflow state.
    Any,
    /// Only tasks currently in this state.
    Is(WorkflowState),
}

impl StatusFilter {
    pub fn matches(self, state: WorkflowState) -> bool {
        match self {
            Self::Any => true,
            Self::Is(wanted) => wanted == state,
        }
    }
}

/// Query and transition primitives of the external issue tracker.
///
/// Errors built with `ContentFlowError::tracker_transient` may be retried;
/// everything else is final.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Tasks created strictly after `created_after`, ascending by creation date.
    async fn query_tasks(
        &self,
        created_after: DateTime<Utc>,
        status: StatusFilter,
    ) -> Result<Vec<Task>>;

    /// Current workflow state of a task.
    async fn get_task_status(&self, key: &str) -> Result<WorkflowState>;

    /// Request a move to `target`.
    async fn transition_task(&self, key: &str, target: WorkflowState) -> Result<()>;

    /// States the task may move to from where it is now.
    async fn get_available_transitions(&self, key: &str) -> Result<Vec<WorkflowState>>;
}
