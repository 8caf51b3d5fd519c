pub mod attributes;
pub mod errors;
pub mod hooks;
pub mod merge;
pub mod mutation;
pub mod path;
pub mod read;
pub mod scope;
pub mod temp_ids;
pub mod update;
pub mod write;

pub use attributes::AttributeAuthorizer;
pub use errors::ErrorPathTranslator;
pub use hooks::{Hooks, RequestHook};
pub use merge::{merge_bodies, merge_siblings, merge_trees};
pub use mutation::{assign_storage_paths, MutationTreeBuilder};
pub use path::{
    is_temp_id, join_path, parse_error_path, parse_id, parse_path, ErrorPathInfo, PathSegment,
};
pub use read::{Paginate, ReadPipeline};
pub use scope::{classify, validate_association, ScopeCollector};
pub use temp_ids::{build_redirect_substitution, convert_temp_ids, TempIdMap};
pub use update::{UpdatePipeline, UpdateResult};
pub use write::{WritePipeline, WriteResult};
