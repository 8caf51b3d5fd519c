use std::fmt;
use std::sync::OnceLock;

use crate::error::WriteError;

/// One `(resource-type, id-token)` pair of a client path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    pub resource_type: String,
    pub token: String,
}

impl PathSegment {
    pub fn new(resource_type: &str, token: &str) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            token: token.to_string(),
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.resource_type, self.token)
    }
}

fn segment_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"(?P<type>\w+)(?P<id>(?:\[|\.)[\w+\-*\]]+)")
            .unwrap_or_else(|e| panic!("invalid segment regex: {e}"))
    })
}

fn temp_id_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"^\[[\w+\-]+\]$")
            .unwrap_or_else(|e| panic!("invalid temp id regex: {e}"))
    })
}

fn numeric_id_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"^\.?(\d+)$").unwrap_or_else(|e| panic!("invalid id regex: {e}"))
    })
}

/// Split `surveys.1.questions[q1]` into its segments. Fails unless joining the
/// scanned segments with `.` reproduces the input exactly.
pub fn parse_path(path: &str) -> Result<Vec<PathSegment>, WriteError> {
    let segments: Vec<PathSegment> = segment_regex()
        .captures_iter(path)
        .map(|caps| PathSegment::new(&caps["type"], &caps["id"]))
        .collect();

    if segments.is_empty() || join_path(&segments) != path {
        return Err(WriteError::InvalidPath(path.to_string()));
    }
    Ok(segments)
}

pub fn join_path(segments: &[PathSegment]) -> String {
    segments
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(".")
}

/// Numeric id carried by a token (`.5` or `5`), if any
pub fn parse_id(token: &str) -> Option<&str> {
    numeric_id_regex()
        .captures(token)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// `[tmp1]`-style placeholder for a record created in this request
pub fn is_temp_id(token: &str) -> bool {
    temp_id_regex().is_match(token)
}

pub fn is_wildcard(token: &str) -> bool {
    token == ".*"
}

/// A storage error key split into the node path and the field name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPathInfo {
    /// `questions[0].answers[1]`; `None` for fields of the root record
    pub path: Option<String>,
    pub field: String,
}

/// `questions[0].answers[1].value` -> (`questions[0].answers[1]`, `value`)
pub fn parse_error_path(key: &str) -> ErrorPathInfo {
    match key.rfind(']') {
        Some(idx) => {
            let path = &key[..=idx];
            let field = key[idx + 1..].trim_start_matches('.');
            ErrorPathInfo {
                path: Some(path.to_string()),
                field: field.to_string(),
            }
        }
        None => ErrorPathInfo {
            path: None,
            field: key.to_string(),
        },
    }
}
