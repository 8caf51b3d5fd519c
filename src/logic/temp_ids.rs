use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::logic::path::is_temp_id;
use crate::model::{MutationBody, MutationTree, RecordId, RequestId, TempIdBinding};

/// Replace every placeholder id in the tree with a correlation binding
/// scoped to `request_id`. Returns how many nodes were converted.
pub fn convert_temp_ids(request_id: RequestId, tree: &mut MutationTree) -> usize {
    let mut converted = 0;
    tree.for_each_body_mut(&mut |body: &mut MutationBody| {
        let Some(token) = body.id.as_deref().filter(|id| is_temp_id(id)) else {
            return;
        };
        body.temp_id = Some(TempIdBinding {
            request_id,
            token: token.to_string(),
        });
        body.id = None;
        converted += 1;
    });
    debug!("Converted {} temp ids for request {}", converted, request_id);
    converted
}

/// Placeholder token -> id assigned by the store, for one request
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TempIdMap {
    #[serde(skip)]
    request_id: Option<RequestId>,
    #[serde(flatten)]
    ids: BTreeMap<String, RecordId>,
}

impl TempIdMap {
    pub fn new(request_id: RequestId) -> Self {
        Self {
            request_id: Some(request_id),
            ids: BTreeMap::new(),
        }
    }

    /// Record the real id behind `binding`. Bindings from another request are ignored.
    pub fn record(&mut self, binding: &TempIdBinding, id: RecordId) -> bool {
        if self.request_id != Some(binding.request_id) {
            return false;
        }
        self.ids.insert(binding.token.clone(), id);
        true
    }

    pub fn get(&self, token: &str) -> Option<RecordId> {
        self.ids.get(token).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &RecordId)> {
        self.ids.iter()
    }

    /// Drop tokens the caller never sent
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.ids.retain(|token, _| keep(token));
    }
}

/// Literal substitution of every mapped `[token]` in a template; anything
/// unmapped passes through
pub fn build_redirect_substitution(map: &TempIdMap) -> impl Fn(&str) -> String {
    let replacements: Vec<(String, String)> = map
        .iter()
        .map(|(token, id)| (token.clone(), id.to_string()))
        .collect();

    move |template: &str| {
        replacements
            .iter()
            .fold(template.to_string(), |acc, (token, id)| acc.replace(token, id))
    }
}
