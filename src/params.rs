//! Named-parameter rewriting
//!
//! Rewrites `:name` placeholders in statement text into positional `?`
//! markers plus an ordered value list, so named execution can delegate to
//! the positional path. Tokens inside single- or double-quoted literals are
//! left untouched. Repeated names produce one list entry per occurrence,
//! matching positional semantics where each marker consumes one value.

use std::collections::HashMap;

use regex_lite::Regex;

use crate::error::{Result, ServerError};
use crate::wire::Value;

/// Result of scanning a statement text for named placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenStatement {
    /// Text with every named placeholder replaced by `?`.
    pub text: String,
    /// Placeholder names in occurrence order, duplicates preserved.
    pub names: Vec<String>,
}

fn placeholder_regex() -> Regex {
    // Colon followed by one or more word characters.
    Regex::new(r":([A-Za-z0-9_]+)").unwrap()
}

/// Byte ranges of quoted string literals in `text`.
///
/// Tracks ' and " separately; a doubled quote inside a literal of the same
/// kind is the standard SQL escape and stays inside the literal.
fn quoted_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        if c != '\'' && c != '"' {
            continue;
        }
        let quote = c;
        let mut end = text.len();
        while let Some((i, d)) = chars.next() {
            if d == quote {
                if let Some(&(_, next)) = chars.peek() {
                    if next == quote {
                        chars.next();
                        continue;
                    }
                }
                end = i + d.len_utf8();
                break;
            }
        }
        spans.push((start, end));
    }
    spans
}

fn in_quoted_span(spans: &[(usize, usize)], pos: usize) -> bool {
    spans.iter().any(|&(s, e)| pos >= s && pos < e)
}

/// Scan `text` and replace every named placeholder outside string literals
/// with a positional marker. Idempotent: text without named placeholders
/// passes through unchanged.
pub fn scan(text: &str) -> RewrittenStatement {
    let spans = quoted_spans(text);
    let re = placeholder_regex();

    let mut out = String::with_capacity(text.len());
    let mut names = Vec::new();
    let mut cursor = 0;

    for caps in re.captures_iter(text) {
        let whole = caps.get(0).unwrap();
        if in_quoted_span(&spans, whole.start()) {
            continue;
        }
        out.push_str(&text[cursor..whole.start()]);
        out.push('?');
        names.push(caps.get(1).unwrap().as_str().to_string());
        cursor = whole.end();
    }
    out.push_str(&text[cursor..]);

    RewrittenStatement { text: out, names }
}

/// Resolve scanned names against a value map, in occurrence order.
pub fn bind(names: &[String], values: &HashMap<String, Value>) -> Result<Vec<Value>> {
    names
        .iter()
        .map(|name| {
            values
                .get(name)
                .cloned()
                .ok_or_else(|| ServerError::MissingParameter(name.clone()))
        })
        .collect()
}
