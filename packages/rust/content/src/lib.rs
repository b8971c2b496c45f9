//! Task classification and content extraction.
//!
//! Turns a tracker task into a normalized [`ContentRecord`]: title, single-line
//! teaser, and a body of delimiter-wrapped paragraphs hard-wrapped to the
//! configured line length. Extraction never fails; structural problems in the
//! description are reported as [`ExtractionAnomaly`] values next to a
//! best-effort record.

mod classify;
mod cleanup;
mod wrap;

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument, warn};

use contentflow_shared::{ContentRecord, ContentType, Tags, Task};

pub use classify::Classifier;
pub use wrap::{format_body, wrap_paragraph};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Options for [`extract`].
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Hard limit for body lines, delimiters included.
    pub max_line_len: usize,
    /// Teasers longer than this are flagged.
    pub teaser_warn_len: usize,
    /// Year written into the record's tags.
    pub year: i32,
}

/// A structural problem found while extracting; never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionAnomaly {
    EmptyDescription,
    /// No title could be found; the summary was used.
    MissingTitle,
    /// Fewer than two paragraphs.
    MissingTeaser,
    /// Fewer than three paragraphs.
    MissingBody,
    TeaserTooLong { len: usize, limit: usize },
    /// A body word longer than the line limit was kept on its own line.
    OversizedWord { len: usize },
    /// `Default` tasks are not meant to reach extraction.
    UnpublishableType,
}

impl std::fmt::Display for ExtractionAnomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyDescription => write!(f, "description is empty"),
            Self::MissingTitle => write!(f, "no title found, summary used instead"),
            Self::MissingTeaser => write!(f, "no teaser paragraph"),
            Self::MissingBody => write!(f, "no body paragraphs"),
            Self::TeaserTooLong { len, limit } => {
                write!(f, "teaser is {len} characters (recommended max {limit})")
            }
            Self::OversizedWord { len } => {
                write!(f, "body word of {len} characters exceeds the line limit")
            }
            Self::UnpublishableType => write!(f, "task type is not publishable"),
        }
    }
}

/// A record plus everything that looked wrong while building it.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub record: ContentRecord,
    pub anomalies: Vec<ExtractionAnomaly>,
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// Build a content record from a task.
///
/// 1. Split the description into non-blank paragraphs
/// 2. Title: labeled/heading/first line (press releases) or the summary (news)
/// 3. Teaser: second paragraph, markup stripped, one line
/// 4. Body: third paragraph onward, wrapped with block delimiters
#[instrument(skip_all, fields(key = %task.key, content_type = %content_type))]
pub fn extract(task: &Task, content_type: ContentType, opts: &ExtractOptions) -> Extraction {
    let mut anomalies = Vec::new();
    let paragraphs = split_paragraphs(&task.description);

    if paragraphs.is_empty() {
        anomalies.push(ExtractionAnomaly::EmptyDescription);
    }

    let title = match content_type {
        ContentType::PressRelease => find_title(&task.description),
        ContentType::News | ContentType::Default => None,
    };
    let title = match title {
        Some(title) => title,
        None => {
            if content_type == ContentType::PressRelease {
                anomalies.push(ExtractionAnomaly::MissingTitle);
            }
            task.summary.trim().to_string()
        }
    };

    let teaser = match paragraphs.get(1) {
        Some(p) => cleanup::strip_markup(p),
        None => {
            anomalies.push(ExtractionAnomaly::MissingTeaser);
            String::new()
        }
    };
    let teaser_len = teaser.chars().count();
    if teaser_len > opts.teaser_warn_len {
        anomalies.push(ExtractionAnomaly::TeaserTooLong {
            len: teaser_len,
            limit: opts.teaser_warn_len,
        });
    }

    let body_source: Vec<String> = paragraphs
        .iter()
        .skip(2)
        .map(|p| cleanup::escape_block_delimiters(&cleanup::collapse_whitespace(p)))
        .collect();
    let body = format_body(&body_source, opts.max_line_len);
    if body.is_empty() {
        anomalies.push(ExtractionAnomaly::MissingBody);
    }
    for word in body_source.iter().flat_map(|p| p.split_whitespace()) {
        let len = word.chars().count();
        if len > opts.max_line_len {
            anomalies.push(ExtractionAnomaly::OversizedWord { len });
        }
    }

    let kind = match content_type.tag() {
        Some(tag) => tag,
        None => {
            anomalies.push(ExtractionAnomaly::UnpublishableType);
            "default"
        }
    };

    for anomaly in &anomalies {
        warn!(key = %task.key, %anomaly, "extraction anomaly");
    }
    debug!(
        title = %title,
        teaser_len,
        body_paragraphs = body.len(),
        "record extracted"
    );

    Extraction {
        record: ContentRecord {
            key: task.key.clone(),
            title,
            tags: Tags::new(kind, opts.year),
            teaser,
            body,
            media: Vec::new(),
            created_at: task.created_at,
            updated_at: task.created_at,
        },
        anomalies,
    }
}

/// Split text into non-blank paragraphs separated by blank lines.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line.trim_end());
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n"));
    }

    paragraphs
}

/// Find a press-release title: a `Title:`/`Cím:` label, else the first
/// heading, else the first non-empty line. Markup is stripped.
fn find_title(description: &str) -> Option<String> {
    static LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?im)^\s*(?:title|headline|cím)\s*:\s*(\S.*)$").expect("valid regex")
    });
    static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^\s*(?:#{1,6}|h[1-6]\.)\s+(\S.*)$").expect("valid regex")
    });

    let candidate = LABEL_RE
        .captures(description)
        .or_else(|| HEADING_RE.captures(description))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .or_else(|| description.lines().find(|l| !l.trim().is_empty()))?;

    let title = cleanup::strip_markup(candidate);
    (!title.is_empty()).then_some(title)
}
