pub mod executor;
pub mod memory;
pub mod postgres;
pub mod traits;
pub mod validate;

pub use executor::*;
pub use memory::*;
pub use postgres::*;
pub use traits::*;
pub use validate::*;
