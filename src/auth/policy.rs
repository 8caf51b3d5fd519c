use anyhow::Result;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Arc;

use crate::auth::strategy::{denial_entry, AuthorizationStrategy};
use crate::error::WriteError;
use crate::model::{Record, Registry, Scope, ScopeFilter, ScopeKind, UserContext};
use crate::store::RecordStore;

/// Per-resource rules: which kinds of access a user has, and to which records
pub trait Policy: Send + Sync {
    /// `record` is the addressed record for show/update/destroy scopes
    fn allows(&self, kind: ScopeKind, user: &UserContext, record: Option<&Record>) -> bool;

    /// Records visible to `user` for reads and bulk writes
    fn scope(&self, _user: &UserContext) -> ScopeFilter {
        ScopeFilter::All
    }
}

/// Looks up a `Policy` per resource type and loads the records scopes point at.
/// Types without a policy are denied.
pub struct PolicyStrategy<S: RecordStore> {
    store: Arc<S>,
    registry: Arc<Registry>,
    policies: HashMap<String, Arc<dyn Policy>>,
}

impl<S: RecordStore> PolicyStrategy<S> {
    pub fn new(store: Arc<S>, registry: Arc<Registry>) -> Self {
        Self {
            store,
            registry,
            policies: HashMap::new(),
        }
    }

    pub fn with_policy(mut self, resource_type: &str, policy: impl Policy + 'static) -> Self {
        let name = self
            .registry
            .resource(resource_type)
            .map(|r| r.name.clone())
            .unwrap_or_else(|| resource_type.to_string());
        self.policies.insert(name, Arc::new(policy));
        self
    }

    fn policy(&self, resource_type: &str) -> Option<&Arc<dyn Policy>> {
        let name = self
            .registry
            .resource(resource_type)
            .map(|r| r.name.as_str())
            .unwrap_or(resource_type);
        self.policies.get(name)
    }

    /// The record a show/update/destroy scope names
    async fn load_target(&self, scope: &Scope) -> Result<Record, WriteError> {
        let id = scope
            .record_id()
            .ok_or_else(|| WriteError::not_found(&scope.resource_type, scope.id()))?;
        self.store
            .get_record(&scope.resource_type, id)
            .await?
            .ok_or_else(|| WriteError::not_found(&scope.resource_type, id))
    }
}

#[async_trait::async_trait]
impl<S: RecordStore> AuthorizationStrategy for PolicyStrategy<S> {
    async fn authorize(&self, scopes: &[Scope], user: &UserContext) -> Result<(), WriteError> {
        let mut denials = Vec::new();

        for scope in scopes.iter().filter(|s| !s.destroyed) {
            let allowed = match self.policy(&scope.resource_type) {
                None => {
                    warn!("No policy registered for {}", scope.resource_type);
                    false
                }
                Some(policy) if scope.kind.targets_record() => {
                    let record = self.load_target(scope).await?;
                    policy.allows(scope.kind, user, Some(&record))
                }
                Some(policy) => policy.allows(scope.kind, user, None),
            };

            if !allowed {
                debug!(
                    "Denied {} on {} at {}",
                    scope.kind, scope.resource_type, scope.client_path
                );
                denials.push(denial_entry(user, scope));
            }
        }

        if denials.is_empty() {
            Ok(())
        } else {
            Err(WriteError::Unauthorized(denials))
        }
    }

    async fn authorized_scope(
        &self,
        user: &UserContext,
        resource_type: &str,
    ) -> Result<ScopeFilter> {
        Ok(self
            .policy(resource_type)
            .map(|policy| policy.scope(user))
            .unwrap_or(ScopeFilter::Nothing))
    }
}

/// Policy built from closures, handy for wiring simple rules
pub struct FnPolicy<A, F>
where
    A: Fn(ScopeKind, &UserContext, Option<&Record>) -> bool + Send + Sync,
    F: Fn(&UserContext) -> ScopeFilter + Send + Sync,
{
    allows: A,
    scope: F,
}

impl<A, F> FnPolicy<A, F>
where
    A: Fn(ScopeKind, &UserContext, Option<&Record>) -> bool + Send + Sync,
    F: Fn(&UserContext) -> ScopeFilter + Send + Sync,
{
    pub fn new(allows: A, scope: F) -> Self {
        Self { allows, scope }
    }
}

impl<A, F> Policy for FnPolicy<A, F>
where
    A: Fn(ScopeKind, &UserContext, Option<&Record>) -> bool + Send + Sync,
    F: Fn(&UserContext) -> ScopeFilter + Send + Sync,
{
    fn allows(&self, kind: ScopeKind, user: &UserContext, record: Option<&Record>) -> bool {
        (self.allows)(kind, user, record)
    }

    fn scope(&self, user: &UserContext) -> ScopeFilter {
        (self.scope)(user)
    }
}
