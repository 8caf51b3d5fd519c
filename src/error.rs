use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// `detail` is a single message, or the ordered list when a field has several
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorDetail {
    Message(String),
    Messages(Vec<String>),
}

impl ErrorDetail {
    pub fn from_messages(mut messages: Vec<String>) -> Self {
        if messages.len() == 1 {
            ErrorDetail::Message(messages.remove(0))
        } else {
            ErrorDetail::Messages(messages)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorSource {
    pub pointer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<String>,
}

impl ErrorSource {
    pub fn pointer(pointer: impl Into<String>) -> Self {
        Self {
            pointer: Some(pointer.into()),
            ..Default::default()
        }
    }
}

/// One entry of the error list returned to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub title: String,
    pub detail: ErrorDetail,
    pub source: ErrorSource,
}

impl ErrorEntry {
    pub fn new(title: impl Into<String>, detail: impl Into<String>, source: ErrorSource) -> Self {
        Self {
            title: title.into(),
            detail: ErrorDetail::Message(detail.into()),
            source,
        }
    }

    /// Title doubles as detail, no pointer
    pub fn message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(message.clone(), message, ErrorSource::default())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Unknown ID format: {0}")]
    InvalidId(String),

    #[error("{parent} has no association named {child}")]
    InvalidAssociation { parent: String, child: String },

    #[error("{child} cannot be addressed through collection scope {parent}")]
    InvalidParentScope { parent: String, child: String },

    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Not authorized")]
    Unauthorized(Vec<ErrorEntry>),

    #[error("{resource_type} with id '{id}' not found")]
    NotFound { resource_type: String, id: String },

    #[error("Unpermitted parameters")]
    UnpermittedParams(Vec<ErrorEntry>),

    #[error("Validation failed")]
    Conflict(Vec<ErrorEntry>),

    #[error(transparent)]
    Store(anyhow::Error),
}

impl From<anyhow::Error> for WriteError {
    /// Recovers a `WriteError` raised below the store boundary, wraps anything else
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<WriteError>() {
            Ok(err) => err,
            Err(err) => WriteError::Store(err),
        }
    }
}

impl WriteError {
    pub fn not_found(resource_type: &str, id: impl ToString) -> Self {
        WriteError::NotFound {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            WriteError::InvalidPath(_)
            | WriteError::InvalidId(_)
            | WriteError::InvalidAssociation { .. }
            | WriteError::InvalidParentScope { .. }
            | WriteError::UnknownResource(_)
            | WriteError::InvalidQuery(_) => 400,
            WriteError::Unauthorized(_) => 403,
            WriteError::NotFound { .. } => 404,
            WriteError::UnpermittedParams(_) => 405,
            WriteError::Conflict(_) => 409,
            WriteError::Store(_) => 500,
        }
    }

    pub fn errors(&self) -> Vec<ErrorEntry> {
        match self {
            WriteError::Unauthorized(entries)
            | WriteError::UnpermittedParams(entries)
            | WriteError::Conflict(entries) => entries.clone(),
            other => vec![ErrorEntry::message(other.to_string())],
        }
    }

    /// `{"errors": [...]}`
    pub fn to_json(&self) -> Value {
        json!({ "errors": self.errors() })
    }
}
