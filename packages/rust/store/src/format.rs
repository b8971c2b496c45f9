//! Text format of the content store.
//!
//! ```text
//! # contentflow content store v1
//! PR-42:
//!   title: "X"
//!   tags: ["press-release", "2026"]
//!   teaser: "Short teaser."
//!   body: |
//!     <p>Para one.</p>
//!   media: []
//!   created_at: "2026-10-18 09:30:00"
//!   updated_at: "2026-10-18 09:30:00"
//! ```

use std::collections::HashSet;

use chrono::{DateTime, NaiveDateTime, Utc};

use contentflow_shared::{
    BLOCK_CLOSE, BLOCK_OPEN, BodyParagraph, ContentFlowError, ContentRecord,
    STORE_TIMESTAMP_FORMAT, Result, Tags,
};

/// Header line written to new stores.
pub const STORE_HEADER: &str = "# contentflow content store v1";

/// Prefix every store header must carry, whatever its version suffix.
const HEADER_PREFIX: &str = "# contentflow content store";

const FIELD_INDENT: &str = "  ";
const BODY_INDENT: &str = "    ";

// ---------------------------------------------------------------------------
// Store model
// ---------------------------------------------------------------------------

/// A parsed record together with the exact text it was parsed from.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    record: ContentRecord,
    raw: String,
}

impl StoredRecord {
    pub fn key(&self) -> &str {
        &self.record.key
    }

    pub fn record(&self) -> &ContentRecord {
        &self.record
    }

    /// Source text of the record, trailing blank lines and comments included.
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

/// In-memory content store: the header section followed by records in file order.
#[derive(Debug, Clone)]
pub struct ContentStore {
    header: String,
    records: Vec<StoredRecord>,
}

impl ContentStore {
    /// A store holding only the current header.
    pub fn empty() -> Self {
        Self {
            header: format!("{STORE_HEADER}\n"),
            records: Vec::new(),
        }
    }

    /// Parse store text. Errors carry the 1-based line number.
    pub fn parse(text: &str) -> Result<Self> {
        let lines: Vec<&str> = text.split_inclusive('\n').collect();

        let first = lines
            .first()
            .ok_or_else(|| parse_error(1, "store is empty, expected a header line"))?;
        if !first.starts_with(HEADER_PREFIX) {
            return Err(parse_error(
                1,
                format!("expected header starting with `{HEADER_PREFIX}`"),
            ));
        }

        // Header section: the header line plus any comments or blank lines before the first key.
        let mut idx = 1;
        while idx < lines.len() && !is_key_line(lines[idx]) {
            let line = trim_eol(lines[idx]);
            if !is_filler(line) {
                return Err(parse_error(
                    idx + 1,
                    format!("expected a record key, found `{line}`"),
                ));
            }
            idx += 1;
        }
        let header = lines[..idx].concat();

        let mut records = Vec::new();
        let mut seen = HashSet::new();
        while idx < lines.len() {
            let start = idx;
            idx += 1;
            while idx < lines.len() && !is_key_line(lines[idx]) {
                idx += 1;
            }

            let record = parse_record(&lines[start..idx], start + 1)?;
            if !seen.insert(record.key.clone()) {
                return Err(parse_error(
                    start + 1,
                    format!("duplicate record key `{}`", record.key),
                ));
            }
            records.push(StoredRecord {
                record,
                raw: lines[start..idx].concat(),
            });
        }

        Ok(Self { header, records })
    }

    /// Render the store back to text. Untouched records are emitted verbatim.
    pub fn serialize(&self) -> String {
        let mut out = String::with_capacity(
            self.header.len() + self.records.iter().map(|r| r.raw.len()).sum::<usize>() + 1,
        );
        out.push_str(&self.header);
        if !out.ends_with('\n') {
            out.push('\n');
        }
        for record in &self.records {
            out.push_str(&record.raw);
        }
        out
    }

    /// Insert a record directly after the header, ahead of all existing records.
    pub fn insert_front(&mut self, record: ContentRecord) -> Result<()> {
        if self.contains(&record.key) {
            return Err(ContentFlowError::validation(format!(
                "record `{}` already exists in the store",
                record.key
            )));
        }
        let raw = render_record(&record);
        self.records.insert(0, StoredRecord { record, raw });
        Ok(())
    }

    pub fn records(&self) -> &[StoredRecord] {
        &self.records
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(StoredRecord::key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.iter().any(|r| r.key() == key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for ContentStore {
    fn default() -> Self {
        Self::empty()
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Render one record in store format, ending with a newline.
pub fn render_record(record: &ContentRecord) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}:\n", record.key));
    out.push_str(&format!("{FIELD_INDENT}title: {}\n", quote(&record.title)));
    out.push_str(&format!(
        "{FIELD_INDENT}tags: [{}, {}]\n",
        quote(&record.tags.kind),
        quote(&format!("{:04}", record.tags.year))
    ));
    out.push_str(&format!("{FIELD_INDENT}teaser: {}\n", quote(&record.teaser)));
    out.push_str(&format!("{FIELD_INDENT}body: |\n"));
    for line in record.body.iter().flat_map(|p| p.lines.iter()) {
        out.push_str(&format!("{BODY_INDENT}{line}\n"));
    }
    let media: Vec<String> = record.media.iter().map(|m| quote(m)).collect();
    out.push_str(&format!("{FIELD_INDENT}media: [{}]\n", media.join(", ")));
    out.push_str(&format!(
        "{FIELD_INDENT}created_at: {}\n",
        quote(&record.created_at.format(STORE_TIMESTAMP_FORMAT).to_string())
    ));
    out.push_str(&format!(
        "{FIELD_INDENT}updated_at: {}\n",
        quote(&record.updated_at.format(STORE_TIMESTAMP_FORMAT).to_string())
    ));
    out
}

fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

// ---------------------------------------------------------------------------
// Record parsing
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Fields {
    title: Option<String>,
    tags: Option<Tags>,
    teaser: Option<String>,
    body: Option<Vec<BodyParagraph>>,
    media: Option<Vec<String>>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

fn parse_record(lines: &[&str], first_line: usize) -> Result<ContentRecord> {
    let key_line = trim_eol(lines[0]);
    let key = key_line.strip_suffix(':').unwrap_or(key_line);
    if key.is_empty() || key.contains(char::is_whitespace) || key.contains(':') {
        return Err(parse_error(first_line, format!("invalid record key `{key}`")));
    }

    let mut fields = Fields::default();
    let mut i = 1;
    while i < lines.len() {
        let line_no = first_line + i;
        let line = trim_eol(lines[i]);
        i += 1;

        if is_filler(line) {
            continue;
        }
        let field = line
            .strip_prefix(FIELD_INDENT)
            .filter(|rest| !rest.starts_with(' '))
            .ok_or_else(|| parse_error(line_no, "expected a field indented by two spaces"))?;
        let (name, value) = field
            .split_once(':')
            .ok_or_else(|| parse_error(line_no, "expected `name: value`"))?;
        let value = value.trim();

        match name {
            "title" => set(&mut fields.title, parse_quoted(value, line_no)?, name, line_no)?,
            "teaser" => set(&mut fields.teaser, parse_quoted(value, line_no)?, name, line_no)?,
            "tags" => set(&mut fields.tags, parse_tags(value, line_no)?, name, line_no)?,
            "media" => set(&mut fields.media, parse_list(value, line_no)?, name, line_no)?,
            "created_at" => {
                let at = parse_timestamp(value, line_no)?;
                set(&mut fields.created_at, at, name, line_no)?;
            }
            "updated_at" => {
                let at = parse_timestamp(value, line_no)?;
                set(&mut fields.updated_at, at, name, line_no)?;
            }
            "body" => {
                if value != "|" {
                    return Err(parse_error(line_no, "expected `body: |`"));
                }
                let start = i;
                while i < lines.len() && trim_eol(lines[i]).starts_with(BODY_INDENT) {
                    i += 1;
                }
                let body_lines: Vec<&str> = lines[start..i]
                    .iter()
                    .map(|l| &trim_eol(l)[BODY_INDENT.len()..])
                    .collect();
                let body = parse_body(&body_lines, first_line + start)?;
                set(&mut fields.body, body, name, line_no)?;
            }
            other => {
                return Err(parse_error(line_no, format!("unknown field `{other}`")));
            }
        }
    }

    let missing = |name: &str| parse_error(first_line, format!("record `{key}` is missing `{name}`"));
    Ok(ContentRecord {
        key: key.to_string(),
        title: fields.title.ok_or_else(|| missing("title"))?,
        tags: fields.tags.ok_or_else(|| missing("tags"))?,
        teaser: fields.teaser.ok_or_else(|| missing("teaser"))?,
        body: fields.body.ok_or_else(|| missing("body"))?,
        media: fields.media.ok_or_else(|| missing("media"))?,
        created_at: fields.created_at.ok_or_else(|| missing("created_at"))?,
        updated_at: fields.updated_at.ok_or_else(|| missing("updated_at"))?,
    })
}

fn set<T>(slot: &mut Option<T>, value: T, name: &str, line_no: usize) -> Result<()> {
    if slot.is_some() {
        return Err(parse_error(line_no, format!("field `{name}` given twice")));
    }
    *slot = Some(value);
    Ok(())
}

/// Group body lines into paragraphs: each opens with `<p>` and closes with `</p>`.
fn parse_body(lines: &[&str], first_line: usize) -> Result<Vec<BodyParagraph>> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<String> = Vec::new();

    for (offset, line) in lines.iter().enumerate() {
        if current.is_empty() && !line.starts_with(BLOCK_OPEN) {
            return Err(parse_error(
                first_line + offset,
                format!("body paragraph must start with `{BLOCK_OPEN}`"),
            ));
        }
        current.push((*line).to_string());
        if line.ends_with(BLOCK_CLOSE) {
            paragraphs.push(BodyParagraph::new(std::mem::take(&mut current)));
        }
    }

    if !current.is_empty() {
        return Err(parse_error(
            first_line + lines.len() - 1,
            format!("body paragraph is missing its closing `{BLOCK_CLOSE}`"),
        ));
    }
    Ok(paragraphs)
}

fn parse_tags(value: &str, line_no: usize) -> Result<Tags> {
    let items = parse_list(value, line_no)?;
    let [kind, year] = items.as_slice() else {
        return Err(parse_error(line_no, "tags must be a [type, year] pair"));
    };
    if year.len() != 4 || !year.bytes().all(|b| b.is_ascii_digit()) {
        return Err(parse_error(line_no, format!("invalid tag year `{year}`")));
    }
    let year = year
        .parse()
        .map_err(|_| parse_error(line_no, format!("invalid tag year `{year}`")))?;
    Ok(Tags::new(kind.as_str(), year))
}

fn parse_timestamp(value: &str, line_no: usize) -> Result<DateTime<Utc>> {
    let text = parse_quoted(value, line_no)?;
    NaiveDateTime::parse_from_str(&text, STORE_TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| parse_error(line_no, format!("invalid timestamp `{text}`: {e}")))
}

/// `["a", "b"]` or `[]`.
fn parse_list(value: &str, line_no: usize) -> Result<Vec<String>> {
    let inner = value
        .strip_prefix('[')
        .and_then(|v| v.strip_suffix(']'))
        .ok_or_else(|| parse_error(line_no, "expected a bracketed list"))?
        .trim();

    let mut items = Vec::new();
    let mut rest = inner;
    while !rest.is_empty() {
        let (item, after) = split_quoted(rest)
            .ok_or_else(|| parse_error(line_no, "malformed quoted string in list"))?;
        items.push(item);
        rest = after.trim_start();
        if let Some(after_comma) = rest.strip_prefix(',') {
            rest = after_comma.trim_start();
            if rest.is_empty() {
                return Err(parse_error(line_no, "trailing comma in list"));
            }
        } else if !rest.is_empty() {
            return Err(parse_error(line_no, "expected `,` between list items"));
        }
    }
    Ok(items)
}

fn parse_quoted(value: &str, line_no: usize) -> Result<String> {
    match split_quoted(value) {
        Some((text, "")) => Ok(text),
        Some(_) => Err(parse_error(line_no, "unexpected text after closing quote")),
        None => Err(parse_error(line_no, "expected a double-quoted string")),
    }
}

/// Read one double-quoted string from the start of `s`; returns it and the remainder.
fn split_quoted(s: &str) -> Option<(String, &str)> {
    let body = s.strip_prefix('"')?;
    let mut out = String::new();
    let mut chars = body.char_indices();
    while let Some((idx, c)) = chars.next() {
        match c {
            '"' => return Some((out, &body[idx + 1..])),
            '\\' => match chars.next() {
                Some((_, escaped @ ('"' | '\\'))) => out.push(escaped),
                _ => return None,
            },
            c => out.push(c),
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Line helpers
// ---------------------------------------------------------------------------

fn trim_eol(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

/// A record key line: starts at column 0 and ends with `:`.
fn is_key_line(line: &str) -> bool {
    let line = trim_eol(line);
    line.ends_with(':')
        && line
            .chars()
            .next()
            .is_some_and(|c| !c.is_whitespace() && c != '#')
}

/// Blank or comment line.
fn is_filler(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('#')
}

fn parse_error(line: usize, message: impl std::fmt::Display) -> ContentFlowError {
    ContentFlowError::parse(format!("line {line}: {message}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
