//! In-process tracker used by tests and offline runs.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use contentflow_shared::{ContentFlowError, Result, Task, WorkflowState};

use crate::{IssueTracker, StatusFilter};

/// Tracker operations, used to inject failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackerOp {
    Query,
    GetStatus,
    Transition,
    AvailableTransitions,
}

#[derive(Default)]
struct State {
    tasks: Vec<Task>,
    statuses: HashMap<String, WorkflowState>,
    pending_failures: HashMap<TrackerOp, u32>,
    rejected: HashSet<(String, WorkflowState)>,
    stuck: HashSet<String>,
    offer_all: bool,
    applied: Vec<(String, WorkflowState)>,
}

/// Tracker holding tasks in memory with a linear `Backlog → Open → InProgress → Done` graph.
#[derive(Default)]
pub struct MemoryTracker {
    state: Mutex<State>,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        let tracker = Self::new();
        for task in tasks {
            tracker.add_task(task);
        }
        tracker
    }

    /// Load tasks from a JSON array (the CLI's offline mode).
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ContentFlowError::io(path, e))?;
        let tasks: Vec<Task> = serde_json::from_str(&content).map_err(|e| {
            ContentFlowError::validation(format!("invalid tasks file {}: {e}", path.display()))
        })?;
        debug!(path = %path.display(), count = tasks.len(), "loaded offline tasks");
        Ok(Self::with_tasks(tasks))
    }

    /// Register a task. Its `status` becomes the tracker-side status.
    pub fn add_task(&self, task: Task) {
        let mut state = self.lock();
        state.statuses.insert(task.key.clone(), task.status);
        state.tasks.push(task);
    }

    /// Move a task out of band, bypassing the transition graph.
    pub fn set_status(&self, key: &str, status: WorkflowState) {
        self.lock().statuses.insert(key.to_string(), status);
    }

    /// Current status, if the task exists.
    pub fn status_of(&self, key: &str) -> Option<WorkflowState> {
        self.lock().statuses.get(key).copied()
    }

    /// Make the next `count` calls of `op` fail with a transient error.
    pub fn fail_next(&self, op: TrackerOp, count: u32) {
        *self.lock().pending_failures.entry(op).or_insert(0) += count;
    }

    /// Never offer (and refuse) the move of `key` to `target`.
    pub fn reject_transition(&self, key: &str, target: WorkflowState) {
        self.lock().rejected.insert((key.to_string(), target));
    }

    /// Accept transition requests for `key` but never apply them.
    pub fn ignore_transitions(&self, key: &str) {
        self.lock().stuck.insert(key.to_string());
    }

    /// Offer every other state from any state, like a tracker with reopen
    /// and shortcut transitions configured.
    pub fn offer_every_transition(&self) {
        self.lock().offer_all = true;
    }

    /// Every transition applied so far, in order.
    pub fn applied_transitions(&self) -> Vec<(String, WorkflowState)> {
        self.lock().applied.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_failure(state: &mut State, op: TrackerOp) -> Result<()> {
        if let Some(remaining) = state.pending_failures.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ContentFlowError::tracker_transient(format!(
                    "injected failure for {op:?}"
                )));
            }
        }
        Ok(())
    }

    fn current(state: &State, key: &str) -> Result<WorkflowState> {
        state
            .statuses
            .get(key)
            .copied()
            .ok_or_else(|| ContentFlowError::tracker_permanent(format!("no such task: {key}")))
    }

    fn available(state: &State, key: &str) -> Result<Vec<WorkflowState>> {
        let current = Self::current(state, key)?;
        let candidates: Vec<WorkflowState> = if state.offer_all {
            WorkflowState::ALL
                .into_iter()
                .filter(|s| *s != current)
                .collect()
        } else {
            current.next().into_iter().collect()
        };
        Ok(candidates
            .into_iter()
            .filter(|target| !state.rejected.contains(&(key.to_string(), *target)))
            .collect())
    }
}

#[async_trait]
impl IssueTracker for MemoryTracker {
    async fn query_tasks(
        &self,
        created_after: DateTime<Utc>,
        status: StatusFilter,
    ) -> Result<Vec<Task>> {
        let mut state = self.lock();
        Self::take_failure(&mut state, TrackerOp::Query)?;

        let mut tasks: Vec<Task> = state
            .tasks
            .iter()
            .filter(|t| t.created_at > created_after)
            .map(|t| {
                let mut task = t.clone();
                if let Some(current) = state.statuses.get(&t.key) {
                    task.status = *current;
                }
                task
            })
            .filter(|t| status.matches(t.status))
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }

    async fn get_task_status(&self, key: &str) -> Result<WorkflowState> {
        let mut state = self.lock();
        Self::take_failure(&mut state, TrackerOp::GetStatus)?;
        Self::current(&state, key)
    }

    async fn transition_task(&self, key: &str, target: WorkflowState) -> Result<()> {
        let mut state = self.lock();
        Self::take_failure(&mut state, TrackerOp::Transition)?;

        if !Self::available(&state, key)?.contains(&target) {
            return Err(ContentFlowError::TransitionRejected {
                key: key.to_string(),
                target,
                reason: "transition not available".into(),
            });
        }
        if state.stuck.contains(key) {
            debug!(key, %target, "transition accepted but not applied");
            return Ok(());
        }

        state.statuses.insert(key.to_string(), target);
        state.applied.push((key.to_string(), target));
        Ok(())
    }

    async fn get_available_transitions(&self, key: &str) -> Result<Vec<WorkflowState>> {
        let mut state = self.lock();
        Self::take_failure(&mut state, TrackerOp::AvailableTransitions)?;
        Self::available(&state, key)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn task(key: &str, summary: &str) -> Task {
        Task {
            key: key.into(),
            summary: summary.into(),
            description: String::new(),
            created_at: Utc.with_ymd_and_hms(2026, 10, 1, 8, 0, 0).unwrap(),
            status: WorkflowState::Backlog,
        }
    }

    #[tokio::test]
    async fn query_filters_by_date_and_status() {
        let mut old = task("N-1", "old");
        old.created_at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut open = task("N-2", "open");
        open.status = WorkflowState::Open;
        let fresh = task("N-3", "fresh");

        let tracker = MemoryTracker::with_tasks([old, open, fresh]);
        let since = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        let found = tracker
            .query_tasks(since, StatusFilter::Is(WorkflowState::Backlog))
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key, "N-3");
    }

    #[tokio::test]
    async fn transitions_follow_linear_graph() {
        let tracker = MemoryTracker::with_tasks([task("N-1", "x")]);

        assert_eq!(
            tracker.get_available_transitions("N-1").await.unwrap(),
            vec![WorkflowState::Open]
        );
        let skip = tracker.transition_task("N-1", WorkflowState::Done).await;
        assert!(matches!(skip, Err(ContentFlowError::TransitionRejected { .. })));

        tracker.transition_task("N-1", WorkflowState::Open).await.unwrap();
        assert_eq!(tracker.status_of("N-1"), Some(WorkflowState::Open));
        assert_eq!(tracker.applied_transitions().len(), 1);
    }

    #[tokio::test]
    async fn open_graph_offers_backward_and_skipping_moves() {
        let tracker = MemoryTracker::with_tasks([task("N-1", "x")]);
        tracker.offer_every_transition();
        tracker.set_status("N-1", WorkflowState::Done);

        let offered = tracker.get_available_transitions("N-1").await.unwrap();
        assert_eq!(
            offered,
            vec![
                WorkflowState::Backlog,
                WorkflowState::Open,
                WorkflowState::InProgress
            ]
        );
        tracker.transition_task("N-1", WorkflowState::Open).await.unwrap();
        assert_eq!(tracker.status_of("N-1"), Some(WorkflowState::Open));
    }

    #[tokio::test]
    async fn injected_failures_are_transient_and_consumed() {
        let tracker = MemoryTracker::with_tasks([task("N-1", "x")]);
        tracker.fail_next(TrackerOp::GetStatus, 1);

        let err = tracker.get_task_status("N-1").await.unwrap_err();
        assert!(err.is_transient());
        assert!(tracker.get_task_status("N-1").await.is_ok());
    }

    #[tokio::test]
    async fn unknown_task_is_permanent_error() {
        let tracker = MemoryTracker::new();
        let err = tracker.get_task_status("missing").await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn loads_tasks_from_json_file() {
        let path = std::env::temp_dir().join(format!(
            "cf-tasks-{}.json",
            std::process::id()
        ));
        std::fs::write(
            &path,
            r#"[{"key":"PR-1","summary":"Sajtóközlemény","description":"Title: X",
                "created_at":"2026-10-01T08:00:00Z","status":"backlog"}]"#,
        )
        .unwrap();

        let tracker = MemoryTracker::from_json_file(&path).expect("load tasks");
        assert_eq!(tracker.status_of("PR-1"), Some(WorkflowState::Backlog));

        let _ = std::fs::remove_file(&path);
    }
}
