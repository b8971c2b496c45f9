//! Summary-based task classification.

use regex::Regex;
use tracing::warn;

use contentflow_shared::ContentType;

/// Maps a task summary to a [`ContentType`].
///
/// A summary equal to, or containing as a whole phrase, one of the configured
/// press-release markers is a press release; any other non-blank summary is news;
/// a blank summary is `Default`.
#[derive(Debug, Clone)]
pub struct Classifier {
    markers: Vec<Regex>,
}

impl Classifier {
    pub fn new<S: AsRef<str>>(markers: &[S]) -> Self {
        let markers = markers
            .iter()
            .map(|m| m.as_ref().trim())
            .filter(|m| !m.is_empty())
            .filter_map(|marker| {
                let pattern = format!(r"(?i)(?:^|\W){}(?:$|\W)", regex::escape(marker));
                match Regex::new(&pattern) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        warn!(marker, error = %e, "ignoring unusable press-release marker");
                        None
                    }
                }
            })
            .collect();
        Self { markers }
    }

    /// Classify a summary. Total: never fails, unknown input falls back to `Default`.
    pub fn classify(&self, summary: &str) -> ContentType {
        let summary = summary.trim();
        if summary.is_empty() {
            return ContentType::Default;
        }
        if self.markers.iter().any(|re| re.is_match(summary)) {
            ContentType::PressRelease
        } else {
            ContentType::News
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> Classifier {
        Classifier::new(&["Sajtóközlemény", "Press release"])
    }

    #[test]
    fn exact_marker_is_press_release() {
        assert_eq!(classifier().classify("Sajtóközlemény"), ContentType::PressRelease);
        assert_eq!(classifier().classify("  sajtóközlemény "), ContentType::PressRelease);
    }

    #[test]
    fn marker_as_phrase_is_press_release() {
        assert_eq!(
            classifier().classify("Press release: Q3 results"),
            ContentType::PressRelease
        );
        assert_eq!(
            classifier().classify("Új Sajtóközlemény a partnerségről"),
            ContentType::PressRelease
        );
    }

    #[test]
    fn marker_inside_another_word_does_not_match() {
        assert_eq!(classifier().classify("Press releases archive"), ContentType::News);
    }

    #[test]
    fn other_summary_is_news() {
        assert_eq!(
            classifier().classify("New Partnership Announced"),
            ContentType::News
        );
    }

    #[test]
    fn blank_summary_is_default() {
        assert_eq!(classifier().classify(""), ContentType::Default);
        assert_eq!(classifier().classify("   \t"), ContentType::Default);
    }

    #[test]
    fn empty_markers_are_ignored() {
        let c = Classifier::new(&["", "  "]);
        assert_eq!(c.classify("Anything"), ContentType::News);
    }
}
