use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::auth::AuthorizationStrategy;
use crate::config::WriteSettings;
use crate::error::WriteError;
use crate::logic::attributes::AttributeAuthorizer;
use crate::logic::errors::ErrorPathTranslator;
use crate::logic::hooks::Hooks;
use crate::logic::merge::merge_siblings;
use crate::logic::mutation::{assign_storage_paths, MutationTreeBuilder};
use crate::logic::scope::{discarded_creates, ScopeCollector};
use crate::logic::temp_ids::{build_redirect_substitution, convert_temp_ids, TempIdMap};
use crate::model::{
    ChangedEntity, DestroyedEntity, MutationBody, MutationTree, Registry, RequestContext,
    ScopeFilter, UpdateRequest, UserContext, WriteOutcome, WriteSummary,
};
use crate::store::Store;

/// Response of a successful `perform_update`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub temp_ids: TempIdMap,
    pub destroyed: Vec<DestroyedEntity>,
    pub changed: Vec<ChangedEntity>,
    /// Redirect template with every resolved temp id substituted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
}

impl UpdateResult {
    pub fn redirect_substitution(&self) -> impl Fn(&str) -> String {
        build_redirect_substitution(&self.temp_ids)
    }
}

/// Collaborators one request runs against
pub struct UpdatePipeline<'a> {
    pub store: &'a dyn Store,
    pub registry: &'a Registry,
    pub strategy: &'a dyn AuthorizationStrategy,
    pub hooks: &'a Hooks,
    pub settings: &'a WriteSettings,
}

impl<'a> UpdatePipeline<'a> {
    /// Apply a flat list of path operations as one atomic write
    pub async fn perform_update(
        &self,
        ctx: &RequestContext,
        request: &UpdateRequest,
    ) -> Result<UpdateResult, WriteError> {
        debug!(
            "Update {} received with {} operations",
            ctx.request_id,
            request.data.len()
        );
        self.hooks.run_before_update(ctx)?;

        let mut scopes = ScopeCollector::collect(self.registry, &request.data)?;
        debug!("Update {}: scopes collected", ctx.request_id);

        self.strategy.authorize(&scopes, &ctx.user).await?;
        let discarded = discarded_creates(&scopes);
        AttributeAuthorizer::new(self.registry, self.settings.key_format).authorize(
            &request.data,
            &discarded,
            &ctx.user,
        )?;
        debug!("Update {}: attributes authorized", ctx.request_id);

        let mut tree = MutationTreeBuilder::new(self.registry, self.settings.key_format)
            .build(&request.data, &scopes)?;
        merge_siblings(&mut tree);
        assign_storage_paths(&tree, &mut scopes);
        apply_bulk_filters(self.strategy, &ctx.user, &mut tree).await?;
        debug!("Update {}: tree built", ctx.request_id);

        convert_temp_ids(ctx.request_id, &mut tree);
        debug!("Update {}: temp ids converted", ctx.request_id);

        let summary = if tree.is_empty() {
            WriteSummary::default()
        } else {
            match self.store.execute(self.registry, &tree).await? {
                WriteOutcome::Committed(summary) => summary,
                WriteOutcome::Rejected(failures) => {
                    debug!("Update {}: persisted with failures", ctx.request_id);
                    let entries = ErrorPathTranslator::new(&scopes).translate(&failures);
                    return Err(WriteError::Conflict(entries));
                }
            }
        };
        debug!("Update {}: persisted", ctx.request_id);

        let temp_ids = collect_temp_ids(ctx, &summary);
        let redirect = request
            .redirect
            .as_deref()
            .map(|template| build_redirect_substitution(&temp_ids)(template));
        let changed = present_changes(self.registry, self.settings, &ctx.user, summary.changed);

        debug!("Update {}: response assembled", ctx.request_id);
        Ok(UpdateResult {
            temp_ids,
            destroyed: summary.destroyed,
            changed,
            redirect,
        })
    }
}

/// Restrict every bulk node to the records the user may touch
pub(crate) async fn apply_bulk_filters(
    strategy: &dyn AuthorizationStrategy,
    user: &UserContext,
    tree: &mut MutationTree,
) -> Result<(), WriteError> {
    let mut bulk_types: Vec<String> = Vec::new();
    for (_, body) in tree.walk() {
        if body.bulk && !bulk_types.contains(&body.resource_type) {
            bulk_types.push(body.resource_type.clone());
        }
    }

    let mut filters: HashMap<String, ScopeFilter> = HashMap::new();
    for resource_type in bulk_types {
        let filter = strategy.authorized_scope(user, &resource_type).await?;
        filters.insert(resource_type, filter);
    }

    tree.for_each_body_mut(&mut |body: &mut MutationBody| {
        if body.bulk {
            body.bulk_filter = filters.get(&body.resource_type).cloned();
        }
    });
    Ok(())
}

pub(crate) fn collect_temp_ids(ctx: &RequestContext, summary: &WriteSummary) -> TempIdMap {
    let mut temp_ids = TempIdMap::new(ctx.request_id);
    for created in &summary.created {
        if let Some(binding) = &created.binding {
            temp_ids.record(binding, created.id);
        }
    }
    temp_ids
}

/// Keep only fields the user may fetch, keyed the way the client spells them
pub(crate) fn present_changes(
    registry: &Registry,
    settings: &WriteSettings,
    user: &UserContext,
    changed: Vec<ChangedEntity>,
) -> Vec<ChangedEntity> {
    changed
        .into_iter()
        .filter_map(|mut entity| {
            let resource = registry.resource(&entity.resource_type)?;
            let fetchable = registry
                .permissions(&resource.name)
                .fetchable_fields(resource, user);
            entity.attributes = entity
                .attributes
                .into_iter()
                .filter(|(key, _)| fetchable.contains(key))
                .map(|(key, value)| (settings.key_format.outgoing(&key), value))
                .collect();
            (!entity.attributes.is_empty()).then_some(entity)
        })
        .collect()
}
