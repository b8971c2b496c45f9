//! Workflow Driver: moves a task through `Backlog → Open → InProgress → Done`.
//!
//! Every move reads the current status and compares it with the expected
//! pre-state. It then checks the tracker offers the next state, requests it
//! and re-reads the status to confirm. Moves only ever go one state forward:
//! a task at or past the target is left alone even when the tracker offers a
//! reopen or shortcut transition. Rejections and mismatches come back as a
//! [`TransitionOutcome`]; only tracker communication failures are errors.

use tracing::{info, instrument, warn};

use contentflow_shared::{ContentFlowError, MismatchPolicy, Result, WorkflowState};
use contentflow_tracker::IssueTracker;

/// Moves performed before content processing starts.
pub const PRE_TRANSITIONS: [(WorkflowState, WorkflowState); 2] = [
    (WorkflowState::Backlog, WorkflowState::Open),
    (WorkflowState::Open, WorkflowState::InProgress),
];

/// Move performed after the record is durably written.
pub const TERMINAL_TRANSITION: (WorkflowState, WorkflowState) =
    (WorkflowState::InProgress, WorkflowState::Done);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Requested and confirmed by re-reading the status.
    Applied,
    /// The task was already in the target state.
    AlreadyAtTarget,
    /// The task was already beyond the target; nothing requested.
    AlreadyPast,
    /// Pre-state mismatch under [`MismatchPolicy::Skip`]; nothing requested.
    Skipped,
    /// The next state was not offered, or the tracker refused it.
    Rejected { reason: String },
    /// The tracker accepted the request but the status did not change.
    NotApplied { actual: WorkflowState },
}

/// Result of one [`WorkflowDriver::advance`] call.
#[derive(Debug, Clone)]
pub struct Transition {
    pub key: String,
    pub from: WorkflowState,
    pub to: WorkflowState,
    /// Status read before the request.
    pub observed: WorkflowState,
    pub outcome: TransitionOutcome,
}

impl Transition {
    /// Whether the task ended in `to` or beyond it.
    pub fn reached_target(&self) -> bool {
        matches!(
            self.outcome,
            TransitionOutcome::Applied
                | TransitionOutcome::AlreadyAtTarget
                | TransitionOutcome::AlreadyPast
        )
    }

    /// Human-readable warning, or `None` for a clean move.
    pub fn warning(&self) -> Option<String> {
        let (key, from, to, observed) = (&self.key, self.from, self.to, self.observed);
        match &self.outcome {
            TransitionOutcome::Applied if observed == from => None,
            TransitionOutcome::Applied => Some(format!(
                "{key}: expected {from} before {to}, found {observed}; advanced one state at a time"
            )),
            TransitionOutcome::AlreadyAtTarget => {
                Some(format!("{key}: already {to}, {from} -> {to} not requested"))
            }
            TransitionOutcome::AlreadyPast => Some(format!(
                "{key}: already {observed}, past {to}; {from} -> {to} not requested"
            )),
            TransitionOutcome::Skipped => Some(format!(
                "{key}: expected {from}, found {observed}; {from} -> {to} skipped"
            )),
            TransitionOutcome::Rejected { reason } => {
                Some(format!("{key}: {from} -> {to} rejected: {reason}"))
            }
            TransitionOutcome::NotApplied { actual } => Some(format!(
                "{key}: {from} -> {to} accepted by tracker but status is {actual}"
            )),
        }
    }
}

/// Issues status transitions against the tracker.
pub struct WorkflowDriver<'a> {
    tracker: &'a dyn IssueTracker,
    policy: MismatchPolicy,
}

impl<'a> WorkflowDriver<'a> {
    pub fn new(tracker: &'a dyn IssueTracker, policy: MismatchPolicy) -> Self {
        Self { tracker, policy }
    }

    /// Move `key` forward from `from` to `to`.
    ///
    /// A task found behind `from` is walked forward one state at a time
    /// under [`MismatchPolicy::Proceed`]; a task at or past `to` is never
    /// moved. Returns `Err` only when the tracker could not be reached
    /// (after retries) or answered with a non-transition error.
    #[instrument(skip_all, fields(key = %key, from = %from, to = %to))]
    pub async fn advance(
        &self,
        key: &str,
        from: WorkflowState,
        to: WorkflowState,
    ) -> Result<Transition> {
        let observed = self.tracker.get_task_status(key).await?;
        let done = |outcome: TransitionOutcome| Transition {
            key: key.to_string(),
            from,
            to,
            observed,
            outcome,
        };

        if observed == to {
            warn!(key, %to, "task already in target state");
            return Ok(done(TransitionOutcome::AlreadyAtTarget));
        }
        if observed > to {
            warn!(key, %to, found = %observed, "task already past target state");
            return Ok(done(TransitionOutcome::AlreadyPast));
        }
        if observed != from {
            warn!(key, expected = %from, found = %observed, policy = ?self.policy, "status mismatch");
            if self.policy == MismatchPolicy::Skip {
                return Ok(done(TransitionOutcome::Skipped));
            }
        }

        let mut current = observed;
        while current < to {
            let Some(next) = current.next() else { break };
            if let Some(outcome) = self.step(key, current, next).await? {
                return Ok(done(outcome));
            }
            current = next;
        }

        info!(key, %from, %to, "transition applied");
        Ok(done(TransitionOutcome::Applied))
    }

    /// Run [`TERMINAL_TRANSITION`].
    pub async fn complete(&self, key: &str) -> Result<Transition> {
        let (from, to) = TERMINAL_TRANSITION;
        self.advance(key, from, to).await
    }

    /// Request the single forward move `current → next` and confirm it.
    /// `None` means the move took effect.
    async fn step(
        &self,
        key: &str,
        current: WorkflowState,
        next: WorkflowState,
    ) -> Result<Option<TransitionOutcome>> {
        let available = self.tracker.get_available_transitions(key).await?;
        if !available.contains(&next) {
            let offered: Vec<&str> = available.iter().map(|s| s.as_str()).collect();
            let reason = format!("{next} not offered from {current} (offered: [{}])", offered.join(", "));
            warn!(key, %next, %reason, "transition unavailable");
            return Ok(Some(TransitionOutcome::Rejected { reason }));
        }

        match self.tracker.transition_task(key, next).await {
            Ok(()) => {}
            Err(ContentFlowError::TransitionRejected { reason, .. }) => {
                warn!(key, %next, %reason, "transition rejected");
                return Ok(Some(TransitionOutcome::Rejected { reason }));
            }
            Err(e) => return Err(e),
        }

        let actual = self.tracker.get_task_status(key).await?;
        if actual != next {
            warn!(key, %next, %actual, "transition did not take effect");
            return Ok(Some(TransitionOutcome::NotApplied { actual }));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use contentflow_shared::Task;
    use contentflow_tracker::{MemoryTracker, TrackerOp};

    fn tracker_with(key: &str, status: WorkflowState) -> MemoryTracker {
        MemoryTracker::with_tasks([Task {
            key: key.into(),
            summary: "News".into(),
            description: String::new(),
            created_at: Utc.with_ymd_and_hms(2026, 10, 1, 8, 0, 0).unwrap(),
            status,
        }])
    }

    #[tokio::test]
    async fn full_sequence_applies_every_move() {
        let tracker = tracker_with("N-1", WorkflowState::Backlog);
        let driver = WorkflowDriver::new(&tracker, MismatchPolicy::Proceed);

        for (from, to) in PRE_TRANSITIONS {
            let t = driver.advance("N-1", from, to).await.unwrap();
            assert_eq!(t.outcome, TransitionOutcome::Applied);
            assert!(t.warning().is_none());
        }
        let done = driver.complete("N-1").await.unwrap();
        assert!(done.reached_target());

        assert_eq!(
            tracker.applied_transitions(),
            vec![
                ("N-1".to_string(), WorkflowState::Open),
                ("N-1".to_string(), WorkflowState::InProgress),
                ("N-1".to_string(), WorkflowState::Done),
            ]
        );
    }

    #[tokio::test]
    async fn already_at_target_is_not_requested() {
        let tracker = tracker_with("N-1", WorkflowState::Open);
        let driver = WorkflowDriver::new(&tracker, MismatchPolicy::Proceed);

        let t = driver
            .advance("N-1", WorkflowState::Backlog, WorkflowState::Open)
            .await
            .unwrap();
        assert_eq!(t.outcome, TransitionOutcome::AlreadyAtTarget);
        assert!(t.reached_target());
        assert!(tracker.applied_transitions().is_empty());
    }

    #[tokio::test]
    async fn mismatch_skipped_under_skip_policy() {
        let tracker = tracker_with("N-1", WorkflowState::Backlog);
        let driver = WorkflowDriver::new(&tracker, MismatchPolicy::Skip);

        let t = driver
            .advance("N-1", WorkflowState::Open, WorkflowState::InProgress)
            .await
            .unwrap();
        assert_eq!(t.outcome, TransitionOutcome::Skipped);
        assert!(t.warning().unwrap().contains("found Backlog"));
        assert_eq!(tracker.status_of("N-1"), Some(WorkflowState::Backlog));
    }

    #[tokio::test]
    async fn mismatch_behind_walks_forward_one_state_at_a_time() {
        let tracker = tracker_with("N-1", WorkflowState::Backlog);
        let driver = WorkflowDriver::new(&tracker, MismatchPolicy::Proceed);

        let t = driver
            .advance("N-1", WorkflowState::Open, WorkflowState::InProgress)
            .await
            .unwrap();
        assert_eq!(t.outcome, TransitionOutcome::Applied);
        assert!(t.warning().unwrap().contains("one state at a time"));
        assert_eq!(
            tracker.applied_transitions(),
            vec![
                ("N-1".to_string(), WorkflowState::Open),
                ("N-1".to_string(), WorkflowState::InProgress),
            ]
        );
    }

    #[tokio::test]
    async fn walk_stops_at_first_rejected_step() {
        let tracker = tracker_with("N-1", WorkflowState::Backlog);
        tracker.reject_transition("N-1", WorkflowState::Open);
        let driver = WorkflowDriver::new(&tracker, MismatchPolicy::Proceed);

        let t = driver
            .advance("N-1", WorkflowState::Open, WorkflowState::InProgress)
            .await
            .unwrap();
        assert!(matches!(t.outcome, TransitionOutcome::Rejected { .. }));
        assert!(tracker.applied_transitions().is_empty());
        assert_eq!(tracker.status_of("N-1"), Some(WorkflowState::Backlog));
    }

    #[tokio::test]
    async fn task_past_target_is_never_moved_back() {
        let tracker = tracker_with("N-1", WorkflowState::Done);
        tracker.offer_every_transition();
        let driver = WorkflowDriver::new(&tracker, MismatchPolicy::Proceed);

        for (from, to) in PRE_TRANSITIONS {
            let t = driver.advance("N-1", from, to).await.unwrap();
            assert_eq!(t.outcome, TransitionOutcome::AlreadyPast);
            assert!(t.reached_target());
        }
        assert!(tracker.applied_transitions().is_empty());
        assert_eq!(tracker.status_of("N-1"), Some(WorkflowState::Done));
    }

    #[tokio::test]
    async fn shortcut_transition_is_not_taken() {
        // InProgress is offered straight from Backlog; the driver still goes via Open.
        let tracker = tracker_with("N-1", WorkflowState::Backlog);
        tracker.offer_every_transition();
        let driver = WorkflowDriver::new(&tracker, MismatchPolicy::Proceed);

        let t = driver
            .advance("N-1", WorkflowState::Open, WorkflowState::InProgress)
            .await
            .unwrap();
        assert_eq!(t.outcome, TransitionOutcome::Applied);
        assert_eq!(
            tracker.applied_transitions(),
            vec![
                ("N-1".to_string(), WorkflowState::Open),
                ("N-1".to_string(), WorkflowState::InProgress),
            ]
        );
    }

    #[tokio::test]
    async fn rejected_transition_leaves_status() {
        let tracker = tracker_with("N-1", WorkflowState::InProgress);
        tracker.reject_transition("N-1", WorkflowState::Done);
        let driver = WorkflowDriver::new(&tracker, MismatchPolicy::Proceed);

        let t = driver.complete("N-1").await.unwrap();
        assert!(!t.reached_target());
        assert!(t.warning().unwrap().contains("rejected"));
        assert_eq!(tracker.status_of("N-1"), Some(WorkflowState::InProgress));
    }

    #[tokio::test]
    async fn unconfirmed_transition_reported() {
        let tracker = tracker_with("N-1", WorkflowState::Backlog);
        tracker.ignore_transitions("N-1");
        let driver = WorkflowDriver::new(&tracker, MismatchPolicy::Proceed);

        let t = driver
            .advance("N-1", WorkflowState::Backlog, WorkflowState::Open)
            .await
            .unwrap();
        assert_eq!(
            t.outcome,
            TransitionOutcome::NotApplied {
                actual: WorkflowState::Backlog
            }
        );
    }

    #[tokio::test]
    async fn tracker_failure_is_an_error() {
        let tracker = tracker_with("N-1", WorkflowState::Backlog);
        tracker.fail_next(TrackerOp::Transition, 1);
        let driver = WorkflowDriver::new(&tracker, MismatchPolicy::Proceed);

        let err = driver
            .advance("N-1", WorkflowState::Backlog, WorkflowState::Open)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
