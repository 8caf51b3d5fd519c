pub mod policy;
pub mod strategy;

pub use policy::*;
pub use strategy::*;
