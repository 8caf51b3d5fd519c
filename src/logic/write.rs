use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

use crate::auth::AuthorizationStrategy;
use crate::config::WriteSettings;
use crate::error::WriteError;
use crate::logic::attributes::AttributeAuthorizer;
use crate::logic::errors::ErrorPathTranslator;
use crate::logic::hooks::Hooks;
use crate::logic::merge::{merge_siblings, merge_trees};
use crate::logic::mutation::assign_storage_paths;
use crate::logic::path::is_temp_id;
use crate::logic::temp_ids::{convert_temp_ids, TempIdMap};
use crate::logic::update::{apply_bulk_filters, collect_temp_ids, present_changes};
use crate::model::{
    Association, Cardinality, DestroyedEntity, Method, MutationBody, MutationTree, Registry,
    RequestContext, ResourceDef, RootMutation, Scope, ScopeKey, ScopeKind, WriteOutcome,
    WriteSummary,
};
use crate::store::Store;

const AUTO_TOKEN_PREFIX: &str = "[deepwrite-auto-";

/// Response of a successful nested `write`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteResult {
    pub temp_ids: TempIdMap,
    /// Records the request asked to destroy, with their client paths
    pub destroyed: Vec<DestroyedEntity>,
    /// Changed records, nested the same way the request was
    pub changed: Value,
}

#[derive(Debug, Clone, PartialEq)]
enum AddressSegment {
    Key(String),
    Index(usize),
}

/// One item of the nested document, flattened
#[derive(Debug)]
struct WriteNode<'r> {
    resource: &'r ResourceDef,
    key: String,
    token: String,
    kind: ScopeKind,
    client_path: String,
    address: Vec<AddressSegment>,
    attributes: Map<String, Value>,
    parent: Option<usize>,
}

/// Scope kind of one nested item
pub fn item_kind(item: &Map<String, Value>) -> ScopeKind {
    let flag = |name: &str| item.get(name).and_then(Value::as_bool).unwrap_or(false);
    let has_attributes = item
        .get("attributes")
        .and_then(Value::as_object)
        .map(|a| !a.is_empty())
        .unwrap_or(false);

    if flag("destroy") {
        ScopeKind::Destroy
    } else if flag("readOnly") || !has_attributes {
        ScopeKind::Show
    } else {
        match item_id(item) {
            Some(id) if is_temp_id(&id) => ScopeKind::Create,
            Some(_) => ScopeKind::Update,
            None => ScopeKind::Create,
        }
    }
}

fn item_id(item: &Map<String, Value>) -> Option<String> {
    match item.get("id") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

pub struct WritePipeline<'a> {
    pub store: &'a dyn Store,
    pub registry: &'a Registry,
    pub strategy: &'a dyn AuthorizationStrategy,
    pub hooks: &'a Hooks,
    pub settings: &'a WriteSettings,
}

impl<'a> WritePipeline<'a> {
    pub async fn write(
        &self,
        ctx: &RequestContext,
        nested: &Map<String, Value>,
    ) -> Result<WriteResult, WriteError> {
        debug!("Write {} received", ctx.request_id);
        self.hooks.run_before_update(ctx)?;

        let nodes = self.flatten(nested)?;
        let mut scopes = scopes_for(&nodes);
        debug!("Write {}: {} scopes collected", ctx.request_id, scopes.len());

        self.strategy.authorize(&scopes, &ctx.user).await?;
        let authorizer = AttributeAuthorizer::new(self.registry, self.settings.key_format);
        let unpermitted: Vec<_> = nodes
            .iter()
            .filter(|n| matches!(n.kind, ScopeKind::Create | ScopeKind::Update))
            .flat_map(|n| {
                authorizer.check(n.resource, n.kind, &n.attributes, &n.client_path, &ctx.user)
            })
            .collect();
        if !unpermitted.is_empty() {
            return Err(WriteError::UnpermittedParams(unpermitted));
        }
        debug!("Write {}: attributes authorized", ctx.request_id);

        let mut tree = self.build_tree(&nodes);
        merge_siblings(&mut tree);
        assign_storage_paths(&tree, &mut scopes);
        apply_bulk_filters(self.strategy, &ctx.user, &mut tree).await?;
        convert_temp_ids(ctx.request_id, &mut tree);
        debug!("Write {}: tree built", ctx.request_id);

        let summary = if tree.is_empty() {
            WriteSummary::default()
        } else {
            match self.store.execute(self.registry, &tree).await? {
                WriteOutcome::Committed(summary) => summary,
                WriteOutcome::Rejected(failures) => {
                    let entries = ErrorPathTranslator::new(&scopes).translate(&failures);
                    return Err(WriteError::Conflict(entries));
                }
            }
        };
        debug!("Write {}: persisted", ctx.request_id);

        let mut temp_ids = collect_temp_ids(ctx, &summary);
        temp_ids.retain(|token| !token.starts_with(AUTO_TOKEN_PREFIX));

        let destroyed = summary
            .destroyed
            .into_iter()
            .filter(|d| d.client_path.is_some())
            .collect();

        let mut changed = Value::Object(Map::new());
        let presented = present_changes(self.registry, self.settings, &ctx.user, summary.changed);
        for entity in presented {
            let Some(node) = nodes
                .iter()
                .find(|n| Some(&n.client_path) == entity.client_path.as_ref())
            else {
                continue;
            };
            let entry = json!({
                "id": entity.id.to_string(),
                "type": node.resource.plural,
                "attributes": entity.attributes,
            });
            set_at(&mut changed, &node.address, entry);
        }

        Ok(WriteResult {
            temp_ids,
            destroyed,
            changed,
        })
    }

    fn flatten(&self, nested: &Map<String, Value>) -> Result<Vec<WriteNode<'a>>, WriteError> {
        let mut nodes = Vec::new();
        self.flatten_level(nested, None, &[], "", &mut nodes)?;
        Ok(nodes)
    }

    fn flatten_level(
        &self,
        level: &Map<String, Value>,
        parent: Option<usize>,
        address: &[AddressSegment],
        prefix: &str,
        nodes: &mut Vec<WriteNode<'a>>,
    ) -> Result<(), WriteError> {
        for (key, value) in level {
            let resource = match parent {
                None => self.registry.require(key)?,
                Some(parent) => {
                    let parent_resource = nodes[parent].resource;
                    let association = parent_resource.association(key).ok_or_else(|| {
                        WriteError::InvalidAssociation {
                            parent: parent_resource.plural.clone(),
                            child: key.clone(),
                        }
                    })?;
                    self.registry.require(&association.target)?
                }
            };

            let mut key_address = address.to_vec();
            key_address.push(AddressSegment::Key(key.clone()));
            let key_path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", prefix, key)
            };

            let items: Vec<(Option<usize>, &Value)> = match value {
                Value::Array(items) => {
                    items.iter().enumerate().map(|(i, v)| (Some(i), v)).collect()
                }
                other => vec![(None, other)],
            };
            for (position, item) in items {
                let item = item.as_object().ok_or_else(|| {
                    WriteError::InvalidQuery(format!("{} must be an object", key_path))
                })?;
                let (client_path, item_address) = match position {
                    Some(idx) => {
                        let mut item_address = key_address.clone();
                        item_address.push(AddressSegment::Index(idx));
                        (format!("{}[{}]", key_path, idx), item_address)
                    }
                    None => (key_path.clone(), key_address.clone()),
                };

                let kind = item_kind(item);
                let token = match (item_id(item), kind) {
                    (Some(id), _) if is_temp_id(&id) => id,
                    (Some(id), _) => format!(".{}", id),
                    (None, ScopeKind::Create) => format!("{}{}]", AUTO_TOKEN_PREFIX, nodes.len()),
                    (None, _) => {
                        return Err(WriteError::InvalidQuery(format!(
                            "{} needs an id",
                            client_path
                        )))
                    }
                };
                let attributes = item
                    .get("attributes")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();

                let idx = nodes.len();
                nodes.push(WriteNode {
                    resource,
                    key: key.clone(),
                    token,
                    kind,
                    client_path: client_path.clone(),
                    address: item_address.clone(),
                    attributes,
                    parent,
                });

                if let Some(include) = item.get("include").and_then(Value::as_object) {
                    let mut include_address = item_address;
                    include_address.push(AddressSegment::Key("include".to_string()));
                    let include_prefix = format!("{}.include", client_path);
                    self.flatten_level(
                        include,
                        Some(idx),
                        &include_address,
                        &include_prefix,
                        nodes,
                    )?;
                }
            }
        }
        Ok(())
    }

    fn body_for(&self, nodes: &[WriteNode<'_>], idx: usize) -> MutationBody {
        let node = &nodes[idx];
        let id = node.token.strip_prefix('.').unwrap_or(&node.token);
        let mut body = MutationBody::new(&node.resource.name, Some(id.to_string()));
        body.client_path = Some(node.client_path.clone());
        match node.kind {
            ScopeKind::Destroy => body.destroy = true,
            ScopeKind::Create | ScopeKind::Update => {
                body.attributes = node
                    .attributes
                    .iter()
                    .map(|(k, v)| (self.settings.key_format.incoming(k), v.clone()))
                    .collect();
            }
            _ => {}
        }

        for (child_idx, child) in nodes.iter().enumerate().filter(|(_, n)| n.parent == Some(idx)) {
            let child_body = self.body_for(nodes, child_idx);
            let cardinality = node
                .resource
                .association(&child.key)
                .map(|a| a.cardinality)
                .unwrap_or(Cardinality::Many);
            match (cardinality, body.associations.get_mut(&child.key)) {
                (_, Some(Association::Many(items))) => items.push(child_body),
                (Cardinality::One, _) => {
                    body.associations
                        .insert(child.key.clone(), Association::One(Box::new(child_body)));
                }
                (Cardinality::Many, _) => {
                    body.associations
                        .insert(child.key.clone(), Association::Many(vec![child_body]));
                }
            }
        }
        body
    }

    fn build_tree(&self, nodes: &[WriteNode<'_>]) -> MutationTree {
        let mut tree = MutationTree::new();
        for (idx, node) in nodes.iter().enumerate().filter(|(_, n)| n.parent.is_none()) {
            let key = node.token.strip_prefix('.').unwrap_or(&node.token);
            let mut fragment = MutationTree::new();
            fragment.roots.push(RootMutation {
                resource_type: node.resource.name.clone(),
                key: key.to_string(),
                method: Method::from_kind(node.kind),
                body: self.body_for(nodes, idx),
            });
            merge_trees(&mut tree, fragment);
        }
        tree
    }
}

fn scopes_for(nodes: &[WriteNode<'_>]) -> Vec<Scope> {
    let mut scopes: Vec<Scope> = nodes
        .iter()
        .map(|node| Scope {
            resource_type: node.resource.name.clone(),
            path_type: node.key.clone(),
            token: node.token.clone(),
            kind: node.kind,
            parent: node.parent.map(|p| {
                let parent = &nodes[p];
                ScopeKey {
                    kind: parent.kind,
                    resource_type: parent.resource.name.clone(),
                    token: parent.token.clone(),
                }
            }),
            occurrence_index: None,
            client_path: node.client_path.clone(),
            error_path: None,
            destroyed: false,
            storage_path: None,
        })
        .collect();

    let mut counters: HashMap<String, usize> = HashMap::new();
    for scope in scopes.iter_mut().filter(|s| s.kind != ScopeKind::Show) {
        let counter = counters.entry(scope.resource_type.clone()).or_insert(0);
        scope.occurrence_index = Some(*counter);
        *counter += 1;
    }
    scopes
}

/// Place `entry` at `address`, creating objects and arrays along the way
fn set_at(target: &mut Value, address: &[AddressSegment], entry: Value) {
    let Some((head, rest)) = address.split_first() else {
        *target = entry;
        return;
    };
    let slot = match head {
        AddressSegment::Key(key) => {
            if !target.is_object() {
                *target = Value::Object(Map::new());
            }
            match target {
                Value::Object(map) => map.entry(key.clone()).or_insert(Value::Null),
                _ => return,
            }
        }
        AddressSegment::Index(idx) => {
            if !target.is_array() {
                *target = Value::Array(Vec::new());
            }
            match target {
                Value::Array(items) => {
                    if items.len() <= *idx {
                        items.resize(idx + 1, Value::Null);
                    }
                    &mut items[*idx]
                }
                _ => return,
            }
        }
    };
    set_at(slot, rest, entry);
}
