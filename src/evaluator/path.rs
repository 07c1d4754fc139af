//! Path lookup into resource documents
//!
//! Paths are dot-separated keys with optional `[n]` list indices, e.g.
//! `status.conditions[0].type` or `status.conditions.[0].type`. A leading
//! `$` or `.` is accepted and ignored.

use crate::core::document::Document;
use crate::error::PipelineError;
use regex::Regex;
use std::sync::LazyLock;

static RE_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^\[\]]*)((?:\[\d+\])*)$").unwrap());

static RE_INDEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[(\d+)\]").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

fn parse(path: &str) -> Result<Vec<Segment>, PipelineError> {
    let invalid = |reason: &str| PipelineError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = path.trim();
    let trimmed = trimmed.strip_prefix('$').unwrap_or(trimmed);
    let trimmed = trimmed.strip_prefix('.').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Err(invalid("path is empty"));
    }

    let mut segments = Vec::new();
    for part in trimmed.split('.') {
        let caps = RE_SEGMENT
            .captures(part)
            .ok_or_else(|| invalid("malformed segment"))?;
        let key = &caps[1];
        let indices = &caps[2];
        if key.is_empty() && indices.is_empty() {
            return Err(invalid("empty segment"));
        }
        if !key.is_empty() {
            segments.push(Segment::Key(key.to_string()));
        }
        for index in RE_INDEX.captures_iter(indices) {
            let n = index[1]
                .parse::<usize>()
                .map_err(|_| invalid("index out of range"))?;
            segments.push(Segment::Index(n));
        }
    }
    Ok(segments)
}

/// Look up `path` in `document`.
///
/// Returns `Ok(None)` when any segment is absent or the value is null, and an
/// error only when the path itself is malformed.
pub fn extract_path(document: &Document, path: &str) -> Result<Option<Document>, PipelineError> {
    let mut current = document;
    for segment in parse(path)? {
        let next = match segment {
            Segment::Key(key) => current.as_object().and_then(|m| m.get(&key)),
            Segment::Index(i) => current.as_array().and_then(|a| a.get(i)),
        };
        match next {
            Some(value) => current = value,
            None => return Ok(None),
        }
    }
    if current.is_null() {
        return Ok(None);
    }
    Ok(Some(current.clone()))
}

/// Like [`extract_path`] but over raw JSON bytes
pub fn extract_path_bytes(json: &[u8], path: &str) -> Result<Option<Document>, PipelineError> {
    let document: Document = serde_json::from_slice(json)?;
    extract_path(&document, path)
}
