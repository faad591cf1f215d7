pub use sea_orm_migration::prelude::*;

mod m20250901_000001_create_plans;
mod m20250901_000002_create_subscriptions;
mod m20250901_000003_create_usage_counters;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250901_000001_create_plans::Migration),
            Box::new(m20250901_000002_create_subscriptions::Migration),
            Box::new(m20250901_000003_create_usage_counters::Migration),
        ]
    }
}
