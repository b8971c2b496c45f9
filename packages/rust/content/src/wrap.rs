//! Body paragraph wrapping under a hard line-length limit.

use contentflow_shared::{BLOCK_CLOSE, BLOCK_OPEN, BodyParagraph};

/// Wrap one paragraph in block delimiters and greedily pack its words into
/// lines of at most `max_len` characters, delimiters included.
///
/// A word that cannot share a line with a delimiter is emitted on its own line
/// and the delimiter gets a line of its own; a word longer than `max_len` is
/// emitted unmodified on its own line. Returns `None` for blank input.
pub fn wrap_paragraph(text: &str, max_len: usize) -> Option<BodyParagraph> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let last = words.len().checked_sub(1)?;
    let open_len = BLOCK_OPEN.len();
    let close_len = BLOCK_CLOSE.len();

    let mut lines: Vec<String> = Vec::new();
    let mut current = String::from(BLOCK_OPEN);
    let mut current_len = open_len;
    let mut has_word = false;

    for (i, word) in words.iter().enumerate() {
        let word_len = word.chars().count();
        let closing = if i == last { close_len } else { 0 };
        let fits = current_len + usize::from(has_word) + word_len + closing <= max_len;

        if !fits && current_len > 0 {
            lines.push(std::mem::take(&mut current));
            current_len = 0;
            has_word = false;
        }

        if current_len == 0 && word_len + closing > max_len {
            lines.push((*word).to_string());
            if i == last {
                lines.push(BLOCK_CLOSE.to_string());
            }
            continue;
        }

        if has_word {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
        has_word = true;

        if i == last {
            current.push_str(BLOCK_CLOSE);
            current_len += close_len;
        }
    }

    if !current.is_empty() {
        lines.push(current);
    }
    Some(BodyParagraph::new(lines))
}

/// Wrap every non-blank paragraph, preserving order.
pub fn format_body<S: AsRef<str>>(paragraphs: &[S], max_len: usize) -> Vec<BodyParagraph> {
    paragraphs
        .iter()
        .filter_map(|p| wrap_paragraph(p.as_ref(), max_len))
        .collect()
}
