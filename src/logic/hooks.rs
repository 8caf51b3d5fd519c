use std::fmt;
use std::sync::Arc;

use crate::error::{ErrorEntry, WriteError};
use crate::model::RequestContext;

/// Callback run before a request touches the store. Returning `Err(message)`
/// rejects the request as unauthorized.
pub type RequestHook = Arc<dyn Fn(&RequestContext) -> Result<(), String> + Send + Sync>;

#[derive(Clone, Default)]
pub struct Hooks {
    pub before_update: Option<RequestHook>,
    pub before_read: Option<RequestHook>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("before_update", &self.before_update.is_some())
            .field("before_read", &self.before_read.is_some())
            .finish()
    }
}

impl Hooks {
    pub fn with_before_update(
        mut self,
        hook: impl Fn(&RequestContext) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.before_update = Some(Arc::new(hook));
        self
    }

    pub fn with_before_read(
        mut self,
        hook: impl Fn(&RequestContext) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.before_read = Some(Arc::new(hook));
        self
    }

    pub fn run_before_update(&self, ctx: &RequestContext) -> Result<(), WriteError> {
        run(self.before_update.as_ref(), ctx)
    }

    pub fn run_before_read(&self, ctx: &RequestContext) -> Result<(), WriteError> {
        run(self.before_read.as_ref(), ctx)
    }
}

fn run(hook: Option<&RequestHook>, ctx: &RequestContext) -> Result<(), WriteError> {
    match hook {
        Some(hook) => hook(ctx)
            .map_err(|message| WriteError::Unauthorized(vec![ErrorEntry::message(message)])),
        None => Ok(()),
    }
}
