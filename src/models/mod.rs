pub mod common;
pub mod entitlement;
pub mod plan;
pub mod subscription;
pub mod usage;

pub use common::*;
pub use entitlement::*;
pub use plan::*;
pub use subscription::*;
pub use usage::*;
