pub mod data;
pub mod policies;
pub mod schema;

pub use data::*;
pub use policies::*;
pub use schema::*;
