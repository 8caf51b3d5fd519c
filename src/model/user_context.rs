use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::{generate_request_id, RequestId};

/// The acting user, as resolved by whatever authenticated the request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    /// Kind of principal (e.g. `Admin`, `Applicant`); policies branch on it
    #[serde(default = "default_user_type")]
    pub user_type: String,
    pub user_email: Option<String>,
    pub user_name: Option<String>,
    /// Free-form flags a policy may consult (e.g. `active`)
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

fn default_user_type() -> String {
    "User".to_string()
}

impl UserContext {
    /// Create a new UserContext with just a user ID
    pub fn new(user_id: String) -> Self {
        Self {
            user_id,
            user_type: default_user_type(),
            user_email: None,
            user_name: None,
            attributes: Map::new(),
        }
    }

    /// Create a UserContext with full user information
    pub fn with_details(user_id: String, email: Option<String>, name: Option<String>) -> Self {
        Self {
            user_email: email,
            user_name: name,
            ..Self::new(user_id)
        }
    }

    pub fn with_type(mut self, user_type: &str) -> Self {
        self.user_type = user_type.to_string();
        self
    }

    pub fn with_attribute(mut self, key: &str, value: Value) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }

    /// Create a system user context for internal operations
    pub fn system() -> Self {
        Self {
            user_id: "system".to_string(),
            user_type: "System".to_string(),
            user_email: Some("system@deepwrite.internal".to_string()),
            user_name: Some("System".to_string()),
            attributes: Map::new(),
        }
    }

    pub fn is_type(&self, user_type: &str) -> bool {
        self.user_type == user_type
    }

    /// `Applicant with id '7'`
    pub fn describe(&self) -> String {
        format!("{} with id '{}'", self.user_type, self.user_id)
    }
}

/// Everything one request carries through the pipeline. Never shared between requests.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: RequestId,
    pub user: UserContext,
    /// Opaque client-supplied context handed to hooks
    pub client_context: Map<String, Value>,
}

impl RequestContext {
    pub fn new(user: UserContext) -> Self {
        Self {
            request_id: generate_request_id(),
            user,
            client_context: Map::new(),
        }
    }

    pub fn with_client_context(mut self, context: Map<String, Value>) -> Self {
        self.client_context = context;
        self
    }
}
