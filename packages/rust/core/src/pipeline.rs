//! Run Coordinator: checkpoint → discovery → per-task pipeline → checkpoint.

use std::time::Instant;

use chrono::{Datelike, Utc};
use tracing::{info, instrument, warn};

use contentflow_content::{Classifier, ExtractOptions, extract};
use contentflow_shared::{Result, RunConfig, RunId, Task, WorkflowState};
use contentflow_storage::CheckpointStore;
use contentflow_store::{StoreIndex, StoreWriter};
use contentflow_tracker::{IssueTracker, StatusFilter};

use crate::checkpoint::CheckpointManager;
use crate::report::{OutcomeKind, RunCompletion, RunReport, TaskOutcome};
use crate::workflow::{PRE_TRANSITIONS, Transition, WorkflowDriver};

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called once discovery has returned.
    fn tasks_discovered(&self, total: usize);
    /// Called before a task is processed (`current` is 1-based).
    fn task_started(&self, key: &str, current: usize, total: usize);
    /// Called after a task has an outcome.
    fn task_finished(&self, outcome: &TaskOutcome);
    /// Called when the run completes.
    fn done(&self, report: &RunReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn tasks_discovered(&self, _total: usize) {}
    fn task_started(&self, _key: &str, _current: usize, _total: usize) {}
    fn task_finished(&self, _outcome: &TaskOutcome) {}
    fn done(&self, _report: &RunReport) {}
}

/// Perform one complete ingestion run.
///
/// 1. Load the checkpoint (lookback window if none)
/// 2. Discover `Backlog` tasks created after it, oldest first
/// 3. Index the content store keys
/// 4. Process each task; failures are recorded and the run moves on
/// 5. Advance the checkpoint to the run's start time, unless the run timed out
///
/// `Err` means the run aborted before any task was touched: checkpoint
/// unreadable, tracker unreachable at discovery, or store unreadable.
#[instrument(skip_all, fields(entity = %config.entity_id, store = %config.store_path.display()))]
pub async fn run(
    config: &RunConfig,
    tracker: &dyn IssueTracker,
    checkpoints: &dyn CheckpointStore,
    progress: &dyn ProgressReporter,
) -> Result<RunReport> {
    let run_id = RunId::new();
    let started_at = Utc::now();
    let deadline = config.timeout.map(|t| Instant::now() + t);

    info!(%run_id, "starting ingestion run");

    // --- Phase 1: Checkpoint ---
    progress.phase("Loading checkpoint");
    let manager = CheckpointManager::new(
        checkpoints,
        config.entity_id.as_str(),
        config.initial_lookback_days,
    );
    let since = manager.get().await?;

    // --- Phase 2: Discovery ---
    progress.phase("Discovering tasks");
    let mut tasks = tracker
        .query_tasks(since, StatusFilter::Is(WorkflowState::Backlog))
        .await?;
    tasks.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.key.cmp(&b.key))
    });
    info!(count = tasks.len(), %since, "tasks discovered");
    progress.tasks_discovered(tasks.len());

    // --- Phase 3: Duplicate Guard ---
    progress.phase("Indexing content store");
    let mut index = StoreIndex::load(&config.store_path)?;

    // --- Phase 4: Tasks ---
    progress.phase("Processing tasks");
    let processor = TaskProcessor {
        classifier: Classifier::new(&config.press_release_markers),
        driver: WorkflowDriver::new(tracker, config.on_state_mismatch),
        writer: StoreWriter::from_config(config),
        extract_opts: ExtractOptions {
            max_line_len: config.max_line_len,
            teaser_warn_len: config.teaser_warn_len,
            year: started_at.year(),
        },
        deadline,
    };

    let mut report = RunReport::new(run_id, started_at, since, tasks.len());
    let mut timed_out = false;
    for (i, task) in tasks.iter().enumerate() {
        if processor.expired() {
            warn!(remaining = tasks.len() - i, "run deadline reached, stopping");
            timed_out = true;
            break;
        }
        progress.task_started(&task.key, i + 1, tasks.len());
        let (outcome, interrupted) = processor.process(task, &mut index).await;
        progress.task_finished(&outcome);
        report.record(outcome);
        if interrupted {
            timed_out = true;
            break;
        }
    }

    // --- Phase 5: Checkpoint ---
    let (completion, saved) = if timed_out {
        warn!("checkpoint not advanced after timeout");
        (RunCompletion::TimedOut, None)
    } else {
        progress.phase("Saving checkpoint");
        match manager.set(started_at).await {
            Ok(()) => (RunCompletion::Completed, Some(started_at)),
            Err(e) => {
                warn!(error = %e, "checkpoint could not be saved");
                (
                    RunCompletion::CheckpointNotSaved {
                        error: e.to_string(),
                    },
                    None,
                )
            }
        }
    };
    report.finish(completion, saved);

    info!(
        processed = report.counts.processed,
        skipped = report.counts.skipped,
        failed = report.counts.failed,
        ignored = report.counts.ignored,
        completion = ?report.completion,
        "ingestion run finished"
    );
    progress.done(&report);

    Ok(report)
}

struct TaskProcessor<'a> {
    classifier: Classifier,
    driver: WorkflowDriver<'a>,
    writer: StoreWriter,
    extract_opts: ExtractOptions,
    deadline: Option<Instant>,
}

impl TaskProcessor<'_> {
    fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Run the per-task pipeline. The flag is true when the deadline cut the task short.
    #[instrument(skip_all, fields(key = %task.key))]
    async fn process(&self, task: &Task, index: &mut StoreIndex) -> (TaskOutcome, bool) {
        let content_type = self.classifier.classify(&task.summary);
        let mut outcome = TaskOutcome::new(task.key.as_str(), content_type);

        if !content_type.is_publishable() {
            info!(summary = %task.summary, "not a content task, ignored");
            return (outcome.with_kind(OutcomeKind::Ignored), false);
        }

        for (from, to) in PRE_TRANSITIONS {
            if self.expired() {
                return interrupted(outcome, "before workflow transitions");
            }
            match self.driver.advance(&task.key, from, to).await {
                Ok(transition) => note(&mut outcome, &transition),
                Err(e) => return failed(outcome, e.to_string()),
            }
        }

        if self.expired() {
            return interrupted(outcome, "before extraction");
        }
        let extraction = extract(task, content_type, &self.extract_opts);
        outcome.anomalies = extraction.anomalies.iter().map(|a| a.to_string()).collect();

        if index.is_duplicate(&task.key) {
            info!("record already in store, skipping");
            return (outcome.with_kind(OutcomeKind::SkippedDuplicate), false);
        }

        if self.expired() {
            return interrupted(outcome, "before the store write");
        }
        match self.writer.merge(&extraction.record) {
            Ok(merged) => {
                index.insert(task.key.as_str());
                outcome.backup_path = Some(merged.backup_path);
            }
            Err(e) => return failed(outcome, e.to_string()),
        }

        // Always attempted once the record is written, deadline or not.
        let kind = match self.driver.complete(&task.key).await {
            Ok(transition) if transition.reached_target() => {
                note(&mut outcome, &transition);
                OutcomeKind::Published
            }
            Ok(transition) => {
                let reason = transition
                    .warning()
                    .unwrap_or_else(|| "terminal transition not applied".to_string());
                note(&mut outcome, &transition);
                OutcomeKind::PublishedNotDone { reason }
            }
            Err(e) => OutcomeKind::PublishedNotDone {
                reason: e.to_string(),
            },
        };
        if let OutcomeKind::PublishedNotDone { reason } = &kind {
            warn!(%reason, "content published but task not marked done");
        }

        (outcome.with_kind(kind), self.expired())
    }
}

fn note(outcome: &mut TaskOutcome, transition: &Transition) {
    if let Some(warning) = transition.warning() {
        outcome.warnings.push(warning);
    }
}

fn failed(outcome: TaskOutcome, error: String) -> (TaskOutcome, bool) {
    warn!(key = %outcome.key, %error, "task failed");
    (outcome.with_kind(OutcomeKind::Failed { error }), false)
}

fn interrupted(outcome: TaskOutcome, step: &str) -> (TaskOutcome, bool) {
    warn!(key = %outcome.key, step, "run deadline reached mid-task");
    let error = format!("run deadline reached {step}");
    (outcome.with_kind(OutcomeKind::Failed { error }), true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    use chrono::{DateTime, Duration as ChronoDuration};
    use contentflow_shared::{ContentFlowError, MismatchPolicy};
    use contentflow_storage::MemoryCheckpointStore;
    use contentflow_store::{init_store, load_store};
    use contentflow_tracker::{MemoryTracker, RetryPolicy, RetryingTracker, TrackerOp};

    const PRESS_DESCRIPTION: &str = "Title: X\n\n**Short teaser.**\n\nPara one.\n\nPara two.";

    struct Fixture {
        dir: PathBuf,
        config: RunConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = std::env::temp_dir().join(format!("cf-pipeline-test-{}", uuid::Uuid::now_v7()));
            let store_path = dir.join("content").join("news.yml");
            init_store(&store_path).unwrap();
            let config = RunConfig {
                entity_id: "content-ingestion".into(),
                store_path,
                backup_dir: Some(dir.join("backups")),
                press_release_markers: vec!["Sajtóközlemény".into()],
                timeout: None,
                initial_lookback_days: 30,
                on_state_mismatch: MismatchPolicy::Proceed,
                max_line_len: 120,
                teaser_warn_len: 200,
            };
            Self { dir, config }
        }

        fn store_keys(&self) -> Vec<String> {
            load_store(&self.config.store_path)
                .unwrap()
                .keys()
                .map(String::from)
                .collect()
        }

        fn cleanup(self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    fn task(key: &str, summary: &str, description: &str, minutes_ago: i64) -> Task {
        Task {
            key: key.into(),
            summary: summary.into(),
            description: description.into(),
            created_at: Utc::now() - ChronoDuration::minutes(minutes_ago),
            status: WorkflowState::Backlog,
        }
    }

    fn press(key: &str, minutes_ago: i64) -> Task {
        task(key, "Sajtóközlemény", PRESS_DESCRIPTION, minutes_ago)
    }

    async fn run_with(
        fx: &Fixture,
        tracker: &dyn IssueTracker,
        checkpoints: &MemoryCheckpointStore,
    ) -> Result<RunReport> {
        run(&fx.config, tracker, checkpoints, &SilentProgress).await
    }

    #[tokio::test]
    async fn press_release_published_end_to_end() {
        let fx = Fixture::new();
        let tracker = MemoryTracker::with_tasks([press("PR-1", 10)]);
        let checkpoints = MemoryCheckpointStore::new();

        let report = run_with(&fx, &tracker, &checkpoints).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.counts.processed, 1);
        let outcome = report.outcome("PR-1").unwrap();
        assert_eq!(outcome.kind, OutcomeKind::Published);
        assert!(outcome.warnings.is_empty());
        assert!(outcome.backup_path.as_ref().is_some_and(|p| p.exists()));

        assert_eq!(
            tracker.applied_transitions(),
            vec![
                ("PR-1".to_string(), WorkflowState::Open),
                ("PR-1".to_string(), WorkflowState::InProgress),
                ("PR-1".to_string(), WorkflowState::Done),
            ]
        );

        let store = load_store(&fx.config.store_path).unwrap();
        let record = store.records()[0].record();
        assert_eq!(record.title, "X");
        assert_eq!(record.teaser, "Short teaser.");
        assert_eq!(record.tags.kind, "press-release");
        assert_eq!(record.tags.year, report.started_at.year());
        assert_eq!(record.body.len(), 2);

        assert_eq!(checkpoints.get("content-ingestion"), Some(report.started_at));
        assert_eq!(report.checkpoint_saved, Some(report.started_at));
        fx.cleanup();
    }

    #[tokio::test]
    async fn news_uses_summary_as_title() {
        let fx = Fixture::new();
        let tracker = MemoryTracker::with_tasks([task(
            "N-1",
            "New Partnership Announced",
            "Lead\n\nTeaser text.\n\nBody.",
            5,
        )]);
        let checkpoints = MemoryCheckpointStore::new();

        let report = run_with(&fx, &tracker, &checkpoints).await.unwrap();
        assert_eq!(report.outcome("N-1").unwrap().content_type, contentflow_shared::ContentType::News);

        let store = load_store(&fx.config.store_path).unwrap();
        assert_eq!(store.records()[0].record().title, "New Partnership Announced");
        assert_eq!(store.records()[0].record().tags.kind, "news");
        fx.cleanup();
    }

    #[tokio::test]
    async fn default_tasks_are_left_alone() {
        let fx = Fixture::new();
        let tracker = MemoryTracker::with_tasks([task("D-1", "   ", "whatever", 5)]);
        let checkpoints = MemoryCheckpointStore::new();

        let report = run_with(&fx, &tracker, &checkpoints).await.unwrap();

        assert_eq!(report.outcome("D-1").unwrap().kind, OutcomeKind::Ignored);
        assert_eq!(report.counts.ignored, 1);
        assert!(tracker.applied_transitions().is_empty());
        assert_eq!(tracker.status_of("D-1"), Some(WorkflowState::Backlog));
        assert!(fx.store_keys().is_empty());
        fx.cleanup();
    }

    #[tokio::test]
    async fn tasks_processed_oldest_first() {
        let fx = Fixture::new();
        let tracker = MemoryTracker::with_tasks([press("PR-NEW", 1), press("PR-OLD", 60)]);
        let checkpoints = MemoryCheckpointStore::new();

        let report = run_with(&fx, &tracker, &checkpoints).await.unwrap();

        let order: Vec<&str> = report.outcomes.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(order, vec!["PR-OLD", "PR-NEW"]);
        // Each record goes in front, so the last processed is first in the file.
        assert_eq!(fx.store_keys(), vec!["PR-NEW", "PR-OLD"]);
        fx.cleanup();
    }

    #[tokio::test]
    async fn rerun_is_idempotent() {
        let fx = Fixture::new();
        let tracker = MemoryTracker::with_tasks([press("PR-1", 10)]);
        let checkpoints = MemoryCheckpointStore::new();
        run_with(&fx, &tracker, &checkpoints).await.unwrap();

        // Same task rediscovered: reopened in the tracker and checkpoint lost.
        tracker.set_status("PR-1", WorkflowState::Backlog);
        let fresh_checkpoints = MemoryCheckpointStore::new();
        let report = run_with(&fx, &tracker, &fresh_checkpoints).await.unwrap();

        assert_eq!(report.outcome("PR-1").unwrap().kind, OutcomeKind::SkippedDuplicate);
        assert_eq!(report.counts.skipped, 1);
        assert_eq!(fx.store_keys(), vec!["PR-1"]);
        fx.cleanup();
    }

    #[tokio::test]
    async fn duplicate_key_in_same_run_written_once() {
        let fx = Fixture::new();
        let tracker = MemoryTracker::with_tasks([press("PR-1", 20), press("PR-1", 10)]);
        let checkpoints = MemoryCheckpointStore::new();

        let report = run_with(&fx, &tracker, &checkpoints).await.unwrap();

        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.outcomes[0].kind, OutcomeKind::Published);
        assert_eq!(report.outcomes[1].kind, OutcomeKind::SkippedDuplicate);
        assert_eq!(fx.store_keys(), vec!["PR-1"]);
        fx.cleanup();
    }

    #[tokio::test]
    async fn published_task_not_reopened_when_tracker_offers_every_move() {
        let fx = Fixture::new();
        let tracker = MemoryTracker::with_tasks([press("PR-1", 20), press("PR-1", 10)]);
        tracker.offer_every_transition();
        let checkpoints = MemoryCheckpointStore::new();

        let report = run_with(&fx, &tracker, &checkpoints).await.unwrap();

        assert_eq!(report.outcomes[0].kind, OutcomeKind::Published);
        assert_eq!(report.outcomes[1].kind, OutcomeKind::SkippedDuplicate);
        assert_eq!(
            tracker.applied_transitions(),
            vec![
                ("PR-1".to_string(), WorkflowState::Open),
                ("PR-1".to_string(), WorkflowState::InProgress),
                ("PR-1".to_string(), WorkflowState::Done),
            ]
        );
        assert_eq!(tracker.status_of("PR-1"), Some(WorkflowState::Done));
        fx.cleanup();
    }

    #[tokio::test]
    async fn delimiter_text_in_description_is_published() {
        let fx = Fixture::new();
        let description = format!(
            "Title: X\n\nTeaser.\n\n{} a</p> more words <p>here",
            "x".repeat(110)
        );
        let tracker =
            MemoryTracker::with_tasks([task("PR-1", "Sajtóközlemény", &description, 10)]);
        let checkpoints = MemoryCheckpointStore::new();

        let report = run_with(&fx, &tracker, &checkpoints).await.unwrap();

        assert_eq!(report.outcome("PR-1").unwrap().kind, OutcomeKind::Published);
        assert_eq!(tracker.status_of("PR-1"), Some(WorkflowState::Done));
        let store = load_store(&fx.config.store_path).unwrap();
        let record = store.records()[0].record();
        assert_eq!(record.body.len(), 1);
        let words = record.body[0].words();
        assert!(words.contains(&"a&lt;/p&gt;"));
        assert!(words.contains(&"&lt;p&gt;here"));
        fx.cleanup();
    }

    #[tokio::test]
    async fn terminal_rejection_reported_distinctly() {
        let fx = Fixture::new();
        let tracker = MemoryTracker::with_tasks([press("PR-1", 10)]);
        tracker.reject_transition("PR-1", WorkflowState::Done);
        let checkpoints = MemoryCheckpointStore::new();

        let report = run_with(&fx, &tracker, &checkpoints).await.unwrap();

        let outcome = report.outcome("PR-1").unwrap();
        assert!(matches!(outcome.kind, OutcomeKind::PublishedNotDone { .. }));
        assert_eq!(report.counts.processed, 1);
        assert_eq!(tracker.status_of("PR-1"), Some(WorkflowState::InProgress));
        assert_eq!(fx.store_keys(), vec!["PR-1"]);
        assert!(report.is_success());
        fx.cleanup();
    }

    #[tokio::test]
    async fn rejected_pre_transition_does_not_block_content() {
        let fx = Fixture::new();
        let tracker = MemoryTracker::with_tasks([press("PR-1", 10)]);
        tracker.reject_transition("PR-1", WorkflowState::Open);
        let checkpoints = MemoryCheckpointStore::new();

        let report = run_with(&fx, &tracker, &checkpoints).await.unwrap();

        let outcome = report.outcome("PR-1").unwrap();
        assert!(matches!(outcome.kind, OutcomeKind::PublishedNotDone { .. }));
        assert!(outcome.warnings.len() >= 2);
        assert_eq!(fx.store_keys(), vec!["PR-1"]);
        assert!(tracker.applied_transitions().is_empty());
        fx.cleanup();
    }

    #[tokio::test]
    async fn exhausted_transient_errors_fail_only_that_task() {
        let fx = Fixture::new();
        let memory = MemoryTracker::with_tasks([press("PR-1", 20), press("PR-2", 10)]);
        memory.fail_next(TrackerOp::GetStatus, 2);
        let tracker = RetryingTracker::new(
            memory,
            RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                multiplier: 1.0,
            },
        );
        let checkpoints = MemoryCheckpointStore::new();

        let report = run_with(&fx, &tracker, &checkpoints).await.unwrap();

        assert!(matches!(
            report.outcome("PR-1").unwrap().kind,
            OutcomeKind::Failed { .. }
        ));
        assert_eq!(report.outcome("PR-2").unwrap().kind, OutcomeKind::Published);
        assert_eq!(report.counts.failed, 1);
        assert_eq!(tracker.inner().status_of("PR-1"), Some(WorkflowState::Backlog));
        assert_eq!(fx.store_keys(), vec!["PR-2"]);
        assert!(report.is_success());
        fx.cleanup();
    }

    #[tokio::test]
    async fn transient_error_within_budget_is_retried() {
        let fx = Fixture::new();
        let memory = MemoryTracker::with_tasks([press("PR-1", 10)]);
        memory.fail_next(TrackerOp::Transition, 1);
        let tracker = RetryingTracker::new(
            memory,
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                multiplier: 2.0,
            },
        );
        let checkpoints = MemoryCheckpointStore::new();

        let report = run_with(&fx, &tracker, &checkpoints).await.unwrap();
        assert_eq!(report.outcome("PR-1").unwrap().kind, OutcomeKind::Published);
        fx.cleanup();
    }

    #[tokio::test]
    async fn discovery_failure_aborts_without_touching_checkpoint() {
        let fx = Fixture::new();
        let tracker = MemoryTracker::with_tasks([press("PR-1", 10)]);
        tracker.fail_next(TrackerOp::Query, 1);
        let checkpoints = MemoryCheckpointStore::new();

        let err = run_with(&fx, &tracker, &checkpoints).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(checkpoints.get("content-ingestion"), None);
        assert!(tracker.applied_transitions().is_empty());
        fx.cleanup();
    }

    #[tokio::test]
    async fn unreadable_store_aborts_before_any_transition() {
        let fx = Fixture::new();
        std::fs::write(&fx.config.store_path, "not a store\n").unwrap();
        let tracker = MemoryTracker::with_tasks([press("PR-1", 10)]);
        let checkpoints = MemoryCheckpointStore::new();

        let err = run_with(&fx, &tracker, &checkpoints).await.unwrap_err();
        assert!(matches!(err, ContentFlowError::StoreParse { .. }));
        assert!(tracker.applied_transitions().is_empty());
        assert_eq!(checkpoints.get("content-ingestion"), None);
        fx.cleanup();
    }

    #[tokio::test]
    async fn timeout_leaves_checkpoint_unchanged() {
        let mut fx = Fixture::new();
        fx.config.timeout = Some(Duration::ZERO);
        let tracker = MemoryTracker::with_tasks([press("PR-1", 10)]);
        let before: DateTime<Utc> = Utc::now() - ChronoDuration::days(1);
        let checkpoints = MemoryCheckpointStore::with_checkpoint("content-ingestion", before);

        let report = run_with(&fx, &tracker, &checkpoints).await.unwrap();

        assert_eq!(report.completion, RunCompletion::TimedOut);
        assert!(!report.is_success());
        assert!(report.outcomes.is_empty());
        assert_eq!(checkpoints.get("content-ingestion"), Some(before));
        assert!(fx.store_keys().is_empty());
        fx.cleanup();
    }

    #[tokio::test]
    async fn checkpoint_save_failure_keeps_content() {
        let fx = Fixture::new();
        let tracker = MemoryTracker::with_tasks([press("PR-1", 10)]);
        let checkpoints = MemoryCheckpointStore::new();
        checkpoints.fail_saves(true);

        let report = run_with(&fx, &tracker, &checkpoints).await.unwrap();

        assert!(matches!(
            report.completion,
            RunCompletion::CheckpointNotSaved { .. }
        ));
        assert!(!report.is_success());
        assert_eq!(report.checkpoint_saved, None);
        assert_eq!(fx.store_keys(), vec!["PR-1"]);
        assert_eq!(checkpoints.get("content-ingestion"), None);
        fx.cleanup();
    }

    #[tokio::test]
    async fn checkpoint_bounds_discovery() {
        let fx = Fixture::new();
        let tracker = MemoryTracker::with_tasks([press("PR-OLD", 120), press("PR-NEW", 5)]);
        let checkpoints = MemoryCheckpointStore::with_checkpoint(
            "content-ingestion",
            Utc::now() - ChronoDuration::minutes(60),
        );

        let report = run_with(&fx, &tracker, &checkpoints).await.unwrap();

        assert_eq!(report.discovered, 1);
        assert_eq!(fx.store_keys(), vec!["PR-NEW"]);
        assert_eq!(tracker.status_of("PR-OLD"), Some(WorkflowState::Backlog));
        fx.cleanup();
    }
}
