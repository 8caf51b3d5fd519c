use itertools::Itertools;
use log::debug;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashSet};

use crate::error::{ErrorEntry, ErrorSource, WriteError};
use crate::logic::path::parse_path;
use crate::logic::scope::{classify, resolve_segments};
use crate::model::{KeyFormat, Operation, Registry, ResourceDef, ScopeKind, UserContext};

/// Checks every operation's attribute keys against the field permissions of
/// the resource it writes to
pub struct AttributeAuthorizer<'a> {
    registry: &'a Registry,
    key_format: KeyFormat,
}

impl<'a> AttributeAuthorizer<'a> {
    pub fn new(registry: &'a Registry, key_format: KeyFormat) -> Self {
        Self {
            registry,
            key_format,
        }
    }

    /// Fields `user` may set on `resource` for a scope of `kind`
    pub fn permitted_fields(
        &self,
        resource: &ResourceDef,
        kind: ScopeKind,
        user: &UserContext,
    ) -> BTreeSet<String> {
        let permissions = self.registry.permissions(&resource.name);
        match kind {
            ScopeKind::Create => permissions.creatable_fields(resource, user),
            _ => permissions.updatable_fields(resource, user),
        }
    }

    /// One entry per unpermitted key of a single write, pointing at `{pointer}.{key}`
    pub fn check(
        &self,
        resource: &ResourceDef,
        kind: ScopeKind,
        attributes: &Map<String, Value>,
        pointer: &str,
        user: &UserContext,
    ) -> Vec<ErrorEntry> {
        let permitted = self.permitted_fields(resource, kind, user);
        let unpermitted: Vec<&String> = attributes
            .keys()
            .filter(|key| !permitted.contains(&self.key_format.incoming(key)))
            .collect();
        if unpermitted.is_empty() {
            return Vec::new();
        }

        let title = format!(
            "Attributes [{}] of {} not allowed to {}",
            unpermitted.iter().join(", "),
            resource.display_name(),
            user.describe()
        );
        debug!("{}", title);
        unpermitted
            .into_iter()
            .map(|key| {
                ErrorEntry::new(
                    title.clone(),
                    "Unpermitted parameter",
                    ErrorSource::pointer(format!("{}.{}", pointer, key)),
                )
            })
            .collect()
    }

    /// Fails with `UnpermittedParams` listing every offending key of every operation.
    /// `discarded` holds the temp tokens of creates that will never be persisted.
    pub fn authorize(
        &self,
        operations: &[Operation],
        discarded: &HashSet<(String, String)>,
        user: &UserContext,
    ) -> Result<(), WriteError> {
        let mut entries = Vec::new();

        for operation in operations {
            let Some(attributes) = operation.attributes.as_ref().filter(|a| !a.is_empty()) else {
                continue;
            };
            if operation.destroy {
                continue;
            }

            let segments = parse_path(&operation.path)?;
            let resources = resolve_segments(self.registry, &segments)?;
            let (Some(segment), Some(resource)) = (segments.last(), resources.last()) else {
                continue;
            };
            let kind = classify(&segment.token, true, false)?;
            if discarded.contains(&(resource.name.clone(), segment.token.clone())) {
                continue;
            }

            entries.extend(self.check(resource, kind, attributes, &operation.path, user));
        }

        if entries.is_empty() {
            Ok(())
        } else {
            Err(WriteError::UnpermittedParams(entries))
        }
    }
}
