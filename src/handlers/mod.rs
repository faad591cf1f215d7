pub mod entitlement;
pub mod subscription;
pub mod webhook;

pub use entitlement::entitlement_config;
pub use subscription::subscription_config;
pub use webhook::webhook_config;
