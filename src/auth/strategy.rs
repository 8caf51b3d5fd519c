use anyhow::Result;

use crate::error::{ErrorEntry, ErrorSource, WriteError};
use crate::model::{class_name, Scope, ScopeFilter, UserContext};

/// Decides which scopes a user may act on and which records bulk operations
/// and reads may reach
#[async_trait::async_trait]
pub trait AuthorizationStrategy: Send + Sync {
    /// Check every scope eagerly. Fails with `Unauthorized` listing each denial.
    async fn authorize(&self, scopes: &[Scope], user: &UserContext) -> Result<(), WriteError>;

    /// The subset of `resource_type` records `user` may touch
    async fn authorized_scope(
        &self,
        user: &UserContext,
        resource_type: &str,
    ) -> Result<ScopeFilter>;
}

/// `Applicant with id '5' is not authorized to update Survey with id '3'`
pub fn denial_message(user: &UserContext, scope: &Scope) -> String {
    let mut target = class_name(&scope.resource_type);
    if scope.kind.targets_record() {
        target.push_str(&format!(" with id '{}'", scope.id()));
    }
    format!(
        "{} is not authorized to {} {}",
        user.describe(),
        scope.kind,
        target
    )
}

pub fn denial_entry(user: &UserContext, scope: &Scope) -> ErrorEntry {
    let message = denial_message(user, scope);
    ErrorEntry::new(
        message.clone(),
        message,
        ErrorSource {
            pointer: Some(scope.client_path.clone()),
            client_path: Some(scope.client_path.clone()),
            storage_path: None,
        },
    )
}

/// Grants everything; for trusted callers such as the command line tool
pub struct AllowAllStrategy;

#[async_trait::async_trait]
impl AuthorizationStrategy for AllowAllStrategy {
    async fn authorize(&self, _scopes: &[Scope], _user: &UserContext) -> Result<(), WriteError> {
        Ok(())
    }

    async fn authorized_scope(
        &self,
        _user: &UserContext,
        _resource_type: &str,
    ) -> Result<ScopeFilter> {
        Ok(ScopeFilter::All)
    }
}
