//! Run orchestration for ContentFlow.
//!
//! Ties the tracker, the content extractor, the store and the checkpoint
//! backend together into one ingestion run ([`pipeline::run`]).

pub mod checkpoint;
pub mod pipeline;
pub mod report;
pub mod workflow;

pub use checkpoint::CheckpointManager;
pub use pipeline::{ProgressReporter, SilentProgress, run};
pub use report::{OutcomeKind, RunCompletion, RunCounts, RunReport, TaskOutcome};
pub use workflow::{Transition, TransitionOutcome, WorkflowDriver};
