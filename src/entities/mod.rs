pub mod plans;
pub mod subscriptions;
pub mod usage_counters;
pub mod usage_events;

pub use plans as plan_entity;
pub use subscriptions as subscription_entity;
pub use usage_counters as usage_counter_entity;
pub use usage_events as usage_event_entity;

pub use subscriptions::SubscriptionState;
