use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Primary key of a persisted record
pub type RecordId = i64;

/// Identifier of one incoming request; scopes temp-id bindings to that request
pub type RequestId = Uuid;

pub fn generate_request_id() -> RequestId {
    Uuid::new_v4()
}

/// Real identifiers are digits only; everything else is a placeholder or a lookup key
pub fn is_real_id(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_digit())
}

pub fn parse_record_id(value: &str) -> Option<RecordId> {
    if is_real_id(value) {
        value.parse().ok()
    } else {
        None
    }
}

/// Casing convention used for attribute keys on the client side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyFormat {
    /// Clients send and receive `camelCase` keys
    Camel,
    /// Clients already speak `snake_case`
    Underscore,
}

impl Default for KeyFormat {
    fn default() -> Self {
        KeyFormat::Camel
    }
}

impl KeyFormat {
    /// Key as stored (always snake_case)
    pub fn incoming(self, key: &str) -> String {
        match self {
            KeyFormat::Camel => underscore(key),
            KeyFormat::Underscore => key.to_string(),
        }
    }

    /// Key as presented back to the client
    pub fn outgoing(self, key: &str) -> String {
        match self {
            KeyFormat::Camel => camelize(key),
            KeyFormat::Underscore => key.to_string(),
        }
    }
}

/// `applicantId` -> `applicant_id`
pub fn underscore(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    let mut prev_lower = false;
    for c in key.chars() {
        if c == '-' {
            out.push('_');
            prev_lower = false;
        } else if c.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.extend(c.to_lowercase());
            prev_lower = false;
        } else {
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
            out.push(c);
        }
    }
    out
}

/// `applicant_id` -> `applicantId`
pub fn camelize(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;
    for c in key.chars() {
        if c == '_' {
            upper_next = !out.is_empty();
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// `file_uid` -> `File uid`, `question_id` -> `Question`
pub fn humanize(field: &str) -> String {
    let trimmed = field.strip_suffix("_id").unwrap_or(field);
    let spaced = trimmed.replace('_', " ");
    let mut chars = spaced.trim().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// `survey_answer` -> `SurveyAnswer`
pub fn class_name(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}
