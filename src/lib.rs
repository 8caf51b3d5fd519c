pub mod auth;
pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod seed;
pub mod service;
pub mod store;

pub use auth::{AllowAllStrategy, AuthorizationStrategy, FnPolicy, Policy, PolicyStrategy};
pub use error::{ErrorEntry, WriteError};
pub use logic::{Hooks, UpdateResult, WriteResult};
pub use model::*;
pub use service::WriteService;
pub use store::{InMemoryStore, PostgresStore, Store};
