pub mod catalog;
pub mod meter;
pub mod reconciler;
pub mod resolver;
pub mod subscription;

pub use catalog::CatalogService;
pub use meter::UsageMeter;
pub use reconciler::{RenewalReconciler, SweepReport};
pub use resolver::EntitlementResolver;
pub use subscription::SubscriptionService;
