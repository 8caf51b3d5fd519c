use log::debug;
use serde_json::Map;
use std::collections::{HashMap, HashSet};

use crate::error::WriteError;
use crate::logic::merge::merge_trees;
use crate::logic::path::{join_path, parse_path};
use crate::logic::scope::{classify, discarded_creates, resolve_segments};
use crate::model::{
    Association, Cardinality, KeyFormat, Method, MutationBody, MutationTree, Operation, Registry,
    RootMutation, Scope, ScopeKind, StoragePath,
};

/// Folds flat path operations into one nested mutation tree
pub struct MutationTreeBuilder<'a> {
    registry: &'a Registry,
    key_format: KeyFormat,
}

impl<'a> MutationTreeBuilder<'a> {
    pub fn new(registry: &'a Registry, key_format: KeyFormat) -> Self {
        Self {
            registry,
            key_format,
        }
    }

    /// Build every operation's fragment and deep-merge them in request order.
    /// Operations touching a create that the request also destroys are left out.
    pub fn build(
        &self,
        operations: &[Operation],
        scopes: &[Scope],
    ) -> Result<MutationTree, WriteError> {
        let discarded = discarded_creates(scopes);
        let mut tree = MutationTree::new();

        for operation in operations {
            match self.build_fragment(operation, &discarded)? {
                Some(fragment) => merge_trees(&mut tree, fragment),
                None => debug!("Skipping discarded create at {}", operation.path),
            }
        }

        debug!("Built mutation tree with {} roots", tree.roots.len());
        Ok(tree)
    }

    /// Right fold over the operation's segments: the terminal body is built
    /// first and each preceding segment wraps it in an association.
    pub fn build_fragment(
        &self,
        operation: &Operation,
        discarded: &HashSet<(String, String)>,
    ) -> Result<Option<MutationTree>, WriteError> {
        let segments = parse_path(&operation.path)?;
        let resources = resolve_segments(self.registry, &segments)?;

        let touches_discarded = segments
            .iter()
            .zip(&resources)
            .any(|(segment, resource)| {
                discarded.contains(&(resource.name.clone(), segment.token.clone()))
            });
        if touches_discarded {
            return Ok(None);
        }

        let last = segments.len() - 1;
        let mut cursor: Option<(String, MutationBody)> = None;

        for idx in (0..segments.len()).rev() {
            let segment = &segments[idx];
            let resource = resources[idx];
            let is_last = idx == last;
            let kind = classify(&segment.token, is_last, is_last && operation.destroy)?;

            let mut body = match kind {
                ScopeKind::Index | ScopeKind::UpdateAll | ScopeKind::DestroyAll => {
                    MutationBody::bulk(&resource.name)
                }
                _ => {
                    let id = segment.token.strip_prefix('.').unwrap_or(&segment.token);
                    MutationBody::new(&resource.name, Some(id.to_string()))
                }
            };
            body.client_path = Some(join_path(&segments[..=idx]));

            if is_last {
                if operation.destroy {
                    body.destroy = true;
                } else if let Some(attributes) = &operation.attributes {
                    body.attributes = self.normalize_keys(attributes);
                }
                body.error_path = operation.error_path.clone();
            }

            if let Some((name, child)) = cursor.take() {
                let cardinality = self
                    .registry
                    .association(&resource.name, &name)
                    .map(|a| a.cardinality)
                    .unwrap_or(Cardinality::Many);
                let association = match cardinality {
                    Cardinality::Many => Association::Many(vec![child]),
                    Cardinality::One => Association::One(Box::new(child)),
                };
                body.associations.insert(name, association);
            }

            if idx == 0 {
                let key = segment.token.strip_prefix('.').unwrap_or(&segment.token);
                let method = Method::from_kind(kind);
                let mut tree = MutationTree::new();
                tree.roots.push(RootMutation {
                    resource_type: resource.name.clone(),
                    key: key.to_string(),
                    method,
                    body,
                });
                return Ok(Some(tree));
            }

            cursor = Some((segment.resource_type.clone(), body));
        }

        Ok(None)
    }

    fn normalize_keys(
        &self,
        attributes: &Map<String, serde_json::Value>,
    ) -> Map<String, serde_json::Value> {
        attributes
            .iter()
            .map(|(key, value)| (self.key_format.incoming(key), value.clone()))
            .collect()
    }
}

/// Give every non-show scope the positional storage path of the tree node
/// that carries its client path
pub fn assign_storage_paths(tree: &MutationTree, scopes: &mut [Scope]) {
    let mut by_client_path: HashMap<&str, StoragePath> = HashMap::new();
    for (path, body) in tree.walk() {
        if let Some(client_path) = body.client_path.as_deref() {
            by_client_path.entry(client_path).or_insert(path);
        }
    }

    for scope in scopes.iter_mut().filter(|s| s.kind != ScopeKind::Show) {
        scope.storage_path = by_client_path.get(scope.client_path.as_str()).cloned();
    }
}
