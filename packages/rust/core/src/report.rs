//! Run report: per-task outcomes and aggregate counts.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use contentflow_shared::{ContentType, RunId};

/// How one task ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Record written and task moved to `Done`.
    Published,
    /// Record written but the terminal transition failed.
    PublishedNotDone { reason: String },
    /// Key already in the store; nothing written.
    SkippedDuplicate,
    /// `Default` content type; no transitions, no record.
    Ignored,
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub key: String,
    pub content_type: ContentType,
    pub kind: OutcomeKind,
    /// Transition mismatches and rejections, in order.
    pub warnings: Vec<String>,
    /// Extraction anomalies for the record.
    pub anomalies: Vec<String>,
    /// Store backup taken for this task's write.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
}

impl TaskOutcome {
    pub(crate) fn new(key: impl Into<String>, content_type: ContentType) -> Self {
        Self {
            key: key.into(),
            content_type,
            kind: OutcomeKind::Ignored,
            warnings: Vec::new(),
            anomalies: Vec::new(),
            backup_path: None,
        }
    }

    pub(crate) fn with_kind(mut self, kind: OutcomeKind) -> Self {
        self.kind = kind;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    /// Published, with or without the terminal transition.
    pub processed: usize,
    /// Duplicates.
    pub skipped: usize,
    pub failed: usize,
    pub ignored: usize,
}

/// How the run as a whole ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunCompletion {
    /// Every task attempted and the checkpoint advanced.
    Completed,
    /// Deadline reached; checkpoint left unchanged.
    TimedOut,
    /// Every task attempted but the checkpoint could not be saved.
    CheckpointNotSaved { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Discovery lower bound used for this run.
    pub checkpoint: DateTime<Utc>,
    /// New checkpoint, when it was saved.
    pub checkpoint_saved: Option<DateTime<Utc>>,
    pub discovered: usize,
    pub counts: RunCounts,
    pub outcomes: Vec<TaskOutcome>,
    pub completion: RunCompletion,
}

impl RunReport {
    pub(crate) fn new(
        run_id: RunId,
        started_at: DateTime<Utc>,
        checkpoint: DateTime<Utc>,
        discovered: usize,
    ) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: started_at,
            checkpoint,
            checkpoint_saved: None,
            discovered,
            counts: RunCounts::default(),
            outcomes: Vec::with_capacity(discovered),
            completion: RunCompletion::Completed,
        }
    }

    pub(crate) fn record(&mut self, outcome: TaskOutcome) {
        match outcome.kind {
            OutcomeKind::Published | OutcomeKind::PublishedNotDone { .. } => {
                self.counts.processed += 1
            }
            OutcomeKind::SkippedDuplicate => self.counts.skipped += 1,
            OutcomeKind::Failed { .. } => self.counts.failed += 1,
            OutcomeKind::Ignored => self.counts.ignored += 1,
        }
        self.outcomes.push(outcome);
    }

    pub(crate) fn finish(&mut self, completion: RunCompletion, checkpoint_saved: Option<DateTime<Utc>>) {
        self.completion = completion;
        self.checkpoint_saved = checkpoint_saved;
        self.finished_at = Utc::now();
    }

    /// True only when the run completed and the checkpoint was saved.
    pub fn is_success(&self) -> bool {
        self.completion == RunCompletion::Completed
    }

    pub fn outcome(&self, key: &str) -> Option<&TaskOutcome> {
        self.outcomes.iter().find(|o| o.key == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_follow_outcome_kinds() {
        let now = Utc::now();
        let mut report = RunReport::new(RunId::new(), now, now, 5);
        let kinds = [
            OutcomeKind::Published,
            OutcomeKind::PublishedNotDone {
                reason: "rejected".into(),
            },
            OutcomeKind::SkippedDuplicate,
            OutcomeKind::Ignored,
            OutcomeKind::Failed {
                error: "boom".into(),
            },
        ];
        for (i, kind) in kinds.into_iter().enumerate() {
            report.record(TaskOutcome::new(format!("T-{i}"), ContentType::News).with_kind(kind));
        }

        assert_eq!(
            report.counts,
            RunCounts {
                processed: 2,
                skipped: 1,
                failed: 1,
                ignored: 1,
            }
        );
        assert!(report.is_success());

        report.finish(RunCompletion::TimedOut, None);
        assert!(!report.is_success());
    }

    #[test]
    fn report_serializes_to_json() {
        let now = Utc::now();
        let mut report = RunReport::new(RunId::new(), now, now, 1);
        report.record(
            TaskOutcome::new("PR-1", ContentType::PressRelease).with_kind(OutcomeKind::Failed {
                error: "store parse error".into(),
            }),
        );
        report.finish(
            RunCompletion::CheckpointNotSaved {
                error: "db locked".into(),
            },
            None,
        );

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["counts"]["failed"], 1);
        assert_eq!(json["outcomes"][0]["kind"]["kind"], "failed");
        assert_eq!(json["outcomes"][0]["content_type"], "press_release");
        assert_eq!(json["completion"]["status"], "checkpoint_not_saved");
    }
}
