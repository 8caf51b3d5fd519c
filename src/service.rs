use log::info;
use serde_json::Value;
use std::sync::Arc;

use crate::auth::AuthorizationStrategy;
use crate::config::WriteSettings;
use crate::error::WriteError;
use crate::logic::{Hooks, ReadPipeline, UpdatePipeline, UpdateResult, WritePipeline, WriteResult};
use crate::model::{NestedRequest, Registry, RequestContext, UpdateRequest, UserContext};
use crate::store::Store;

/// Entry point bundling the store, the resource registry, authorization and
/// per-deployment settings. Every call is an independent request.
pub struct WriteService<S: Store> {
    store: Arc<S>,
    registry: Arc<Registry>,
    strategy: Arc<dyn AuthorizationStrategy>,
    hooks: Hooks,
    settings: WriteSettings,
}

impl<S: Store> WriteService<S> {
    pub fn new(
        store: Arc<S>,
        registry: Arc<Registry>,
        strategy: Arc<dyn AuthorizationStrategy>,
    ) -> Self {
        Self {
            store,
            registry,
            strategy,
            hooks: Hooks::default(),
            settings: WriteSettings::default(),
        }
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_settings(mut self, settings: WriteSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Apply flat path operations atomically
    pub async fn perform_update(
        &self,
        user: &UserContext,
        request: &UpdateRequest,
    ) -> Result<UpdateResult, WriteError> {
        let ctx = RequestContext::new(user.clone()).with_client_context(request.context.clone());
        let result = UpdatePipeline {
            store: self.store.as_ref(),
            registry: &self.registry,
            strategy: self.strategy.as_ref(),
            hooks: &self.hooks,
            settings: &self.settings,
        }
        .perform_update(&ctx, request)
        .await;

        match &result {
            Ok(result) => info!(
                "Update {} by {}: {} changed, {} destroyed",
                ctx.request_id,
                user.describe(),
                result.changed.len(),
                result.destroyed.len()
            ),
            Err(err) => info!("Update {} failed ({}): {}", ctx.request_id, err.status_code(), err),
        }
        result
    }

    /// Apply a nested `{ key: item }` document atomically
    pub async fn write(
        &self,
        user: &UserContext,
        request: &NestedRequest,
    ) -> Result<WriteResult, WriteError> {
        let ctx = RequestContext::new(user.clone()).with_client_context(request.context.clone());
        let result = WritePipeline {
            store: self.store.as_ref(),
            registry: &self.registry,
            strategy: self.strategy.as_ref(),
            hooks: &self.hooks,
            settings: &self.settings,
        }
        .write(&ctx, &request.data)
        .await;

        if let Err(err) = &result {
            info!("Write {} failed ({}): {}", ctx.request_id, err.status_code(), err);
        }
        result
    }

    /// Resolve a nested query document into a response of the same shape
    pub async fn read(
        &self,
        user: &UserContext,
        request: &NestedRequest,
    ) -> Result<Value, WriteError> {
        let ctx = RequestContext::new(user.clone()).with_client_context(request.context.clone());
        ReadPipeline {
            store: self.store.as_ref(),
            registry: &self.registry,
            strategy: self.strategy.as_ref(),
            hooks: &self.hooks,
            settings: &self.settings,
        }
        .read(&ctx, &request.data)
        .await
    }
}
