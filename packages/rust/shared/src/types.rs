//! Core domain types for the ContentFlow ingestion engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `created_at`/`updated_at` pattern used by the content store.
pub const STORE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Opening body block delimiter, attached to the first word of a paragraph.
pub const BLOCK_OPEN: &str = "<p>";

/// Closing body block delimiter, attached to the last word of a paragraph.
pub const BLOCK_CLOSE: &str = "</p>";

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one pipeline run (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// WorkflowState
// ---------------------------------------------------------------------------

/// Tracker-side workflow status of a content task.
///
/// Ordered: `Backlog < Open < InProgress < Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Backlog,
    Open,
    InProgress,
    Done,
}

impl WorkflowState {
    /// All states in workflow order.
    pub const ALL: [WorkflowState; 4] = [
        WorkflowState::Backlog,
        WorkflowState::Open,
        WorkflowState::InProgress,
        WorkflowState::Done,
    ];

    /// The state directly after this one, if any.
    pub fn next(self) -> Option<WorkflowState> {
        match self {
            Self::Backlog => Some(Self::Open),
            Self::Open => Some(Self::InProgress),
            Self::InProgress => Some(Self::Done),
            Self::Done => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Backlog => "Backlog",
            Self::Open => "Open",
            Self::InProgress => "InProgress",
            Self::Done => "Done",
        }
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ContentType
// ---------------------------------------------------------------------------

/// Content category resolved once from the task summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    PressRelease,
    News,
    /// Not ingested: no transitions, no record.
    Default,
}

impl ContentType {
    /// Tag written into the record's `tags` pair. `None` for [`ContentType::Default`].
    pub fn tag(self) -> Option<&'static str> {
        match self {
            Self::PressRelease => Some("press-release"),
            Self::News => Some("news"),
            Self::Default => None,
        }
    }

    /// Whether tasks of this type go through the workflow and the content pipeline.
    pub fn is_publishable(self) -> bool {
        !matches!(self, Self::Default)
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PressRelease => "PressRelease",
            Self::News => "News",
            Self::Default => "Default",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A content task as read from the issue tracker. Never mutated here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Tracker key (e.g. `PR-42`); doubles as the content record key.
    pub key: String,
    pub summary: String,
    /// Free text, paragraphs separated by blank lines.
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub status: WorkflowState,
}

// ---------------------------------------------------------------------------
// ContentRecord
// ---------------------------------------------------------------------------

/// The `[content-type tag, four-digit year]` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tags {
    pub kind: String,
    pub year: i32,
}

impl Tags {
    pub fn new(kind: impl Into<String>, year: i32) -> Self {
        Self {
            kind: kind.into(),
            year,
        }
    }
}

/// One body paragraph as physical lines, `<p>` on the first and `</p>` on the last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BodyParagraph {
    pub lines: Vec<String>,
}

impl BodyParagraph {
    pub fn new(lines: Vec<String>) -> Self {
        Self { lines }
    }

    /// The paragraph's words with block delimiters removed.
    pub fn words(&self) -> Vec<&str> {
        self.lines
            .iter()
            .flat_map(|line| line.split_whitespace())
            .map(|w| w.trim_start_matches(BLOCK_OPEN).trim_end_matches(BLOCK_CLOSE))
            .filter(|w| !w.is_empty())
            .collect()
    }
}

/// A normalized record in the content store, keyed by [`ContentRecord::key`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub key: String,
    pub title: String,
    pub tags: Tags,
    pub teaser: String,
    pub body: Vec<BodyParagraph>,
    /// Reserved; always empty.
    #[serde(default)]
    pub media: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
