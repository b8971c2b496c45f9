//! Markup cleanup passes for task description text.
//!
//! Each pass is a function `&str -> String`. Descriptions arrive as tracker
//! wiki markup or Markdown; both dialects are handled.

use std::sync::LazyLock;

use regex::Regex;

use contentflow_shared::{BLOCK_CLOSE, BLOCK_OPEN};

/// Strip all inline markup and collapse the result to a single trimmed line.
pub(crate) fn strip_markup(text: &str) -> String {
    let mut result = strip_heading_marker(text);
    result = strip_links(&result);
    result = strip_emphasis(&result);
    collapse_whitespace(&result)
}

// ---------------------------------------------------------------------------
// Pass 1: Heading markers
// ---------------------------------------------------------------------------

/// Remove a leading `#`..`######` or `h1.`..`h6.` heading marker from each line.
fn strip_heading_marker(text: &str) -> String {
    static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^\s*(?:#{1,6}|h[1-6]\.)\s+").expect("valid regex")
    });

    HEADING_RE.replace_all(text, "").to_string()
}

// ---------------------------------------------------------------------------
// Pass 2: Links
// ---------------------------------------------------------------------------

/// Keep only the label of `[label](url)` and `[label|url]` links.
fn strip_links(text: &str) -> String {
    static MD_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\[([^\]]+)\]\([^)]*\)").expect("valid regex")
    });
    static WIKI_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\[([^\]|]+)\|[^\]]*\]").expect("valid regex")
    });

    let result = MD_LINK_RE.replace_all(text, "$1");
    WIKI_LINK_RE.replace_all(&result, "$1").to_string()
}

// ---------------------------------------------------------------------------
// Pass 3: Emphasis
// ---------------------------------------------------------------------------

/// Remove `**bold**`, `__bold__`, `*em*`, `_em_` and `{{mono}}` markers, keeping the text.
fn strip_emphasis(text: &str) -> String {
    static DOUBLE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\*\*(.+?)\*\*|__(.+?)__|\{\{(.+?)\}\}").expect("valid regex")
    });
    static STAR_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\*([^\s*](?:[^*]*[^\s*])?)\*").expect("valid regex")
    });
    static UNDERSCORE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(^|[\s(])_([^\s_](?:[^_]*[^\s_])?)_").expect("valid regex")
    });

    let result = DOUBLE_RE.replace_all(text, "$1$2$3");
    let result = STAR_RE.replace_all(&result, "$1");
    UNDERSCORE_RE.replace_all(&result, "$1$2").to_string()
}

// ---------------------------------------------------------------------------
// Pass 4: Whitespace
// ---------------------------------------------------------------------------

/// Join all whitespace runs (newlines included) into single spaces and trim.
pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// Pass 5: Block delimiters (body only)
// ---------------------------------------------------------------------------

/// Entity-escape literal `<p>`/`</p>` so body words can never be read back
/// as paragraph boundaries.
pub(crate) fn escape_block_delimiters(text: &str) -> String {
    text.replace(BLOCK_CLOSE, "&lt;/p&gt;")
        .replace(BLOCK_OPEN, "&lt;p&gt;")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heading_markers_removed() {
        assert_eq!(strip_heading_marker("## Big news"), "Big news");
        assert_eq!(strip_heading_marker("h1. Big news"), "Big news");
        assert_eq!(strip_heading_marker("#hashtag"), "#hashtag");
    }

    #[test]
    fn links_keep_label() {
        assert_eq!(strip_links("see [our site](https://x.hu) now"), "see our site now");
        assert_eq!(strip_links("see [our site|https://x.hu] now"), "see our site now");
    }

    #[test]
    fn emphasis_removed() {
        assert_eq!(strip_emphasis("**Short teaser.**"), "Short teaser.");
        assert_eq!(strip_emphasis("a *very* _big_ {{deal}}"), "a very big deal");
        assert_eq!(strip_emphasis("__bold__ move"), "bold move");
    }

    #[test]
    fn snake_case_and_math_untouched() {
        assert_eq!(strip_emphasis("call some_function_name"), "call some_function_name");
        assert_eq!(strip_emphasis("2 * 3 = 6"), "2 * 3 = 6");
    }

    #[test]
    fn whitespace_collapsed() {
        assert_eq!(collapse_whitespace("  one\n two\t\tthree  "), "one two three");
    }

    #[test]
    fn block_delimiters_escaped() {
        assert_eq!(
            escape_block_delimiters("a</p> b <p>c <pre>"),
            "a&lt;/p&gt; b &lt;p&gt;c <pre>"
        );
    }

    #[test]
    fn full_pipeline_yields_single_line() {
        let input = "h2. **Big** [launch|https://x.hu]\nof the _year_";
        assert_eq!(strip_markup(input), "Big launch of the year");
    }
}
