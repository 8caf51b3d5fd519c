use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::model::{is_real_id, RequestId, ScopeFilter, ScopeKind};

/// Write method applied to a root entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Update,
    Create,
    Destroy,
    UpdateAll,
    DestroyAll,
}

impl Method {
    /// A root reached only through `show` is written as an empty update
    pub fn from_kind(kind: ScopeKind) -> Method {
        match kind {
            ScopeKind::Show | ScopeKind::Update => Method::Update,
            ScopeKind::Create => Method::Create,
            ScopeKind::Destroy => Method::Destroy,
            ScopeKind::Index | ScopeKind::UpdateAll => Method::UpdateAll,
            ScopeKind::DestroyAll => Method::DestroyAll,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Update => "update",
            Method::Create => "create",
            Method::Destroy => "destroy",
            Method::UpdateAll => "update_all",
            Method::DestroyAll => "destroy_all",
        }
    }

    pub fn is_bulk(&self) -> bool {
        matches!(self, Method::UpdateAll | Method::DestroyAll)
    }
}

/// Identifies one root entry of a mutation tree
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RootRef {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub key: String,
    pub method: Method,
}

/// Positional address of a node inside one root, e.g. `questions[0].answers[1]`.
/// The root record itself has an empty path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoragePath {
    pub root: RootRef,
    pub path: String,
}

impl StoragePath {
    pub fn root(root: RootRef) -> Self {
        Self {
            root,
            path: String::new(),
        }
    }

    pub fn child(&self, association: &str, index: Option<usize>) -> Self {
        let segment = match index {
            Some(index) => format!("{}[{}]", association, index),
            None => association.to_string(),
        };
        let path = if self.path.is_empty() {
            segment
        } else {
            format!("{}.{}", self.path, segment)
        };
        Self {
            root: self.root.clone(),
            path,
        }
    }

    /// Storage key of a field on this node
    pub fn field_key(&self, field: &str) -> String {
        if self.path.is_empty() {
            field.to_string()
        } else {
            format!("{}.{}", self.path, field)
        }
    }
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Request-scoped correlation attached to a node in place of its placeholder id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempIdBinding {
    pub request_id: RequestId,
    pub token: String,
}

/// Nested association content, tagged with the registry's cardinality
#[derive(Debug, Clone, PartialEq)]
pub enum Association {
    Many(Vec<MutationBody>),
    One(Box<MutationBody>),
}

impl Association {
    pub fn bodies(&self) -> Vec<&MutationBody> {
        match self {
            Association::Many(items) => items.iter().collect(),
            Association::One(item) => vec![item.as_ref()],
        }
    }

    pub fn bodies_mut(&mut self) -> Vec<&mut MutationBody> {
        match self {
            Association::Many(items) => items.iter_mut().collect(),
            Association::One(item) => vec![item.as_mut()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MutationBody {
    pub resource_type: String,
    /// Real id, temp token (`[tmp]`) or lookup word; `None` for bulk nodes and
    /// after temp-id conversion
    pub id: Option<String>,
    /// Opaque attribute values, snake_case keys
    pub attributes: Map<String, Value>,
    pub associations: BTreeMap<String, Association>,
    pub destroy: bool,
    /// Nested `.*` terminal: applies to every child of the parent
    pub bulk: bool,
    pub client_path: Option<String>,
    pub error_path: Option<String>,
    pub temp_id: Option<TempIdBinding>,
    /// Authorized subset a bulk node is restricted to
    pub bulk_filter: Option<ScopeFilter>,
}

impl MutationBody {
    pub fn new(resource_type: &str, id: Option<String>) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            id,
            ..Default::default()
        }
    }

    pub fn bulk(resource_type: &str) -> Self {
        Self {
            bulk: true,
            ..Self::new(resource_type, None)
        }
    }

    pub fn is_create(&self) -> bool {
        self.temp_id.is_some()
            || self
                .id
                .as_deref()
                .map(|id| id.starts_with('[') && id.ends_with(']'))
                .unwrap_or(false)
    }

    /// Method the store applies to this node when it sits under a parent
    pub fn method(&self) -> Method {
        match (self.bulk, self.destroy) {
            (true, true) => Method::DestroyAll,
            (true, false) => Method::UpdateAll,
            (false, true) => Method::Destroy,
            (false, false) if self.is_create() => Method::Create,
            _ => Method::Update,
        }
    }

    /// Real numeric id, if this node names an existing record
    pub fn real_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| is_real_id(id))
    }

    pub fn visit_mut(&mut self, f: &mut dyn FnMut(&mut MutationBody)) {
        f(self);
        for association in self.associations.values_mut() {
            for child in association.bodies_mut() {
                child.visit_mut(f);
            }
        }
    }

    /// Render in the store's nested-attributes convention
    /// (`{assoc}_attributes` keys, `_destroy` marker)
    pub fn to_nested_attributes(&self) -> Value {
        let mut out = Map::new();
        if let Some(id) = &self.id {
            out.insert("id".to_string(), Value::String(id.clone()));
        }
        for (key, value) in &self.attributes {
            out.insert(key.clone(), value.clone());
        }
        if self.destroy {
            out.insert("_destroy".to_string(), Value::Bool(true));
        }
        for (name, association) in &self.associations {
            let rendered = match association {
                Association::Many(items) => {
                    Value::Array(items.iter().map(|b| b.to_nested_attributes()).collect())
                }
                Association::One(item) => item.to_nested_attributes(),
            };
            out.insert(format!("{}_attributes", name), rendered);
        }
        Value::Object(out)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RootMutation {
    pub resource_type: String,
    /// `5`, `[tmp]` or `*`
    pub key: String,
    pub method: Method,
    pub body: MutationBody,
}

impl RootMutation {
    pub fn root_ref(&self) -> RootRef {
        RootRef {
            resource_type: self.resource_type.clone(),
            key: self.key.clone(),
            method: self.method,
        }
    }
}

/// Nested write plan: roots keyed by type, id-or-token and method, in request order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MutationTree {
    pub roots: Vec<RootMutation>,
}

impl MutationTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Locate the root for `(type, key, method)` or append an empty one
    pub fn root_mut(
        &mut self,
        resource_type: &str,
        key: &str,
        method: Method,
    ) -> &mut RootMutation {
        let position = self
            .roots
            .iter()
            .position(|r| r.resource_type == resource_type && r.key == key && r.method == method);
        let idx = match position {
            Some(idx) => idx,
            None => {
                let id = (!method.is_bulk()).then(|| key.to_string());
                let mut body = MutationBody::new(resource_type, id);
                body.bulk = method.is_bulk();
                self.roots.push(RootMutation {
                    resource_type: resource_type.to_string(),
                    key: key.to_string(),
                    method,
                    body,
                });
                self.roots.len() - 1
            }
        };
        &mut self.roots[idx]
    }

    pub fn for_each_body_mut(&mut self, f: &mut dyn FnMut(&mut MutationBody)) {
        for root in &mut self.roots {
            root.body.visit_mut(f);
        }
    }

    /// Every node paired with its storage path, pre-order
    pub fn walk(&self) -> Vec<(StoragePath, &MutationBody)> {
        fn descend<'a>(
            path: StoragePath,
            body: &'a MutationBody,
            out: &mut Vec<(StoragePath, &'a MutationBody)>,
        ) {
            out.push((path.clone(), body));
            for (name, association) in &body.associations {
                match association {
                    Association::Many(items) => {
                        for (idx, child) in items.iter().enumerate() {
                            descend(path.child(name, Some(idx)), child, out);
                        }
                    }
                    Association::One(child) => descend(path.child(name, None), child, out),
                }
            }
        }

        let mut out = Vec::new();
        for root in &self.roots {
            descend(StoragePath::root(root.root_ref()), &root.body, &mut out);
        }
        out
    }

    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        for root in &self.roots {
            let by_type = out
                .entry(root.resource_type.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(by_type) = by_type {
                let by_key = by_type
                    .entry(root.key.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(by_key) = by_key {
                    by_key.insert(
                        root.method.as_str().to_string(),
                        root.body.to_nested_attributes(),
                    );
                }
            }
        }
        Value::Object(out)
    }
}
