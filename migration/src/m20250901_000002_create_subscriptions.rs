use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum Subscriptions {
    Table,
    Id,
    UserId,
    PlanId,
    State,
    StartedAt,
    ExpiresAt,
    AutoRenew,
    FailedAttempts,
    GatewayReference,
    LastObservation,
    IsCurrent,
    LockVersion,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Subscriptions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Subscriptions::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Subscriptions::UserId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Subscriptions::PlanId)
                            .string_len(64)
                            .not_null(),
                    )
                    // active | pending_renewal | suspended | expired | cancelled
                    .col(
                        ColumnDef::new(Subscriptions::State)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Subscriptions::StartedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    // null = non-expiring (free / grandfathered lifetime plans)
                    .col(ColumnDef::new(Subscriptions::ExpiresAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Subscriptions::AutoRenew)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Subscriptions::FailedAttempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Subscriptions::GatewayReference).string())
                    .col(ColumnDef::new(Subscriptions::LastObservation).text())
                    .col(
                        ColumnDef::new(Subscriptions::IsCurrent)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Subscriptions::LockVersion)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Subscriptions::CreatedAt)
                            .timestamp_with_time_zone()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Subscriptions::UpdatedAt)
                            .timestamp_with_time_zone()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // "at most one current subscription per user" is enforced by the
        // supersede-in-one-transaction write path; this index keeps the
        // current-row lookup cheap.
        manager
            .create_index(
                Index::create()
                    .name("idx_subscriptions_user_current")
                    .table(Subscriptions::Table)
                    .col(Subscriptions::UserId)
                    .col(Subscriptions::IsCurrent)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_subscriptions_gateway_reference")
                    .table(Subscriptions::Table)
                    .col(Subscriptions::GatewayReference)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_subscriptions_state_expires")
                    .table(Subscriptions::Table)
                    .col(Subscriptions::State)
                    .col(Subscriptions::ExpiresAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Subscriptions::Table).to_owned())
            .await
    }
}
