use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One client-submitted mutation intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Map<String, Value>>,
    #[serde(default)]
    pub destroy: bool,
    /// Client-declared pointer to report validation errors against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_path: Option<String>,
}

impl Operation {
    pub fn update(path: &str, attributes: Value) -> Self {
        Self {
            path: path.to_string(),
            attributes: attributes.as_object().cloned(),
            destroy: false,
            error_path: None,
        }
    }

    pub fn destroy(path: &str) -> Self {
        Self {
            path: path.to_string(),
            attributes: None,
            destroy: true,
            error_path: None,
        }
    }

    pub fn with_error_path(mut self, error_path: &str) -> Self {
        self.error_path = Some(error_path.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub data: Vec<Operation>,
    /// URL template whose `[token]` placeholders are replaced by created ids
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl UpdateRequest {
    pub fn new(data: Vec<Operation>) -> Self {
        Self {
            data,
            ..Default::default()
        }
    }

    pub fn with_redirect(mut self, redirect: &str) -> Self {
        self.redirect = Some(redirect.to_string());
        self
    }

    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context = context;
        self
    }
}

/// Nested document for `write` and `read`, keyed by resource name
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NestedRequest {
    pub data: Map<String, Value>,
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl NestedRequest {
    pub fn new(data: Value) -> Self {
        Self {
            data: data.as_object().cloned().unwrap_or_default(),
            context: Map::new(),
        }
    }

    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context = context;
        self
    }
}
