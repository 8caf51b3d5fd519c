pub mod common;
pub mod mutation;
pub mod operation;
pub mod record;
pub mod registry;
pub mod scope;
pub mod user_context;

pub use common::*;
pub use mutation::*;
pub use operation::*;
pub use record::*;
pub use registry::*;
pub use scope::*;
pub use user_context::*;
