use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::{parse_record_id, RecordId, StoragePath};

/// What a single path segment asks to do with the record(s) it names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    Show,
    Update,
    Destroy,
    UpdateAll,
    DestroyAll,
    Index,
    Create,
}

impl ScopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::Show => "show",
            ScopeKind::Update => "update",
            ScopeKind::Destroy => "destroy",
            ScopeKind::UpdateAll => "update_all",
            ScopeKind::DestroyAll => "destroy_all",
            ScopeKind::Index => "index",
            ScopeKind::Create => "create",
        }
    }

    /// Scopes that name a whole collection rather than one record
    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            ScopeKind::Index | ScopeKind::UpdateAll | ScopeKind::DestroyAll
        )
    }

    pub fn is_bulk(&self) -> bool {
        matches!(self, ScopeKind::UpdateAll | ScopeKind::DestroyAll)
    }

    /// Scopes that address a single existing record by id
    pub fn targets_record(&self) -> bool {
        matches!(self, ScopeKind::Show | ScopeKind::Update | ScopeKind::Destroy)
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity scopes are deduplicated on
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeKey {
    pub kind: ScopeKind,
    pub resource_type: String,
    pub token: String,
}

/// Authorization and error-mapping unit derived from one path segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    /// Canonical (singular) resource name
    pub resource_type: String,
    /// Name as written in the path, i.e. the association name for nested segments
    pub path_type: String,
    /// `.5`, `.*` or `[tmp]`
    pub token: String,
    pub kind: ScopeKind,
    /// Scope of the preceding segment in the same operation
    pub parent: Option<ScopeKey>,
    /// Position among non-show scopes of the same type, request order.
    /// Informational only; error mapping goes through `storage_path`.
    pub occurrence_index: Option<usize>,
    /// Path prefix up to and including this segment
    pub client_path: String,
    pub error_path: Option<String>,
    /// Created and destroyed in the same request; never persisted
    pub destroyed: bool,
    pub storage_path: Option<StoragePath>,
}

impl Scope {
    pub fn key(&self) -> ScopeKey {
        ScopeKey {
            kind: self.kind,
            resource_type: self.resource_type.clone(),
            token: self.token.clone(),
        }
    }

    /// The id portion of the token without its `.` prefix (`5`, `*`, `[tmp]`)
    pub fn id(&self) -> &str {
        self.token.strip_prefix('.').unwrap_or(&self.token)
    }

    pub fn record_id(&self) -> Option<RecordId> {
        parse_record_id(self.id())
    }

    /// Client pointer for this scope: errorPath override first, then the client path
    pub fn pointer(&self) -> &str {
        self.error_path.as_deref().unwrap_or(&self.client_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(token: &str, kind: ScopeKind) -> Scope {
        Scope {
            resource_type: "survey".to_string(),
            path_type: "surveys".to_string(),
            token: token.to_string(),
            kind,
            parent: None,
            occurrence_index: None,
            client_path: format!("surveys{}", token),
            error_path: None,
            destroyed: false,
            storage_path: None,
        }
    }

    #[test]
    fn test_scope_ids() {
        assert_eq!(scope(".12", ScopeKind::Update).record_id(), Some(12));
        assert_eq!(scope("[s1]", ScopeKind::Create).id(), "[s1]");
        assert_eq!(scope("[s1]", ScopeKind::Create).record_id(), None);
        assert_eq!(scope(".*", ScopeKind::UpdateAll).id(), "*");
    }

    #[test]
    fn test_pointer_prefers_error_path() {
        let mut s = scope(".1", ScopeKind::Update);
        assert_eq!(s.pointer(), "surveys.1");
        s.error_path = Some("surveyForm".to_string());
        assert_eq!(s.pointer(), "surveyForm");
    }

    #[test]
    fn test_kind_groups() {
        assert!(ScopeKind::Index.is_collection());
        assert!(!ScopeKind::Index.is_bulk());
        assert!(ScopeKind::DestroyAll.is_bulk());
        assert!(ScopeKind::Show.targets_record());
        assert_eq!(ScopeKind::UpdateAll.to_string(), "update_all");
    }
}
