use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum UsageCounters {
    Table,
    UserId,
    Feature,
    PeriodKey,
    Count,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum UsageEvents {
    Table,
    IdempotencyKey,
    PeriodKey,
    UserId,
    Feature,
    Delta,
    CountedCount,
    CreatedAt,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(UsageCounters::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UsageCounters::UserId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UsageCounters::Feature)
                            .string_len(64)
                            .not_null(),
                    )
                    // calendar month, YYYY-MM, derived from UTC at increment time
                    .col(
                        ColumnDef::new(UsageCounters::PeriodKey)
                            .string_len(7)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UsageCounters::Count)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(UsageCounters::CreatedAt)
                            .timestamp_with_time_zone()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(UsageCounters::UpdatedAt)
                            .timestamp_with_time_zone()
                            .default(Expr::current_timestamp()),
                    )
                    .primary_key(
                        Index::create()
                            .col(UsageCounters::UserId)
                            .col(UsageCounters::Feature)
                            .col(UsageCounters::PeriodKey),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(UsageEvents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UsageEvents::IdempotencyKey)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UsageEvents::PeriodKey)
                            .string_len(7)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UsageEvents::UserId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UsageEvents::Feature)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(ColumnDef::new(UsageEvents::Delta).big_integer().not_null())
                    .col(
                        ColumnDef::new(UsageEvents::CountedCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(UsageEvents::CreatedAt)
                            .timestamp_with_time_zone()
                            .default(Expr::current_timestamp()),
                    )
                    .primary_key(
                        Index::create()
                            .col(UsageEvents::IdempotencyKey)
                            .col(UsageEvents::PeriodKey),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(UsageEvents::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(UsageCounters::Table).to_owned())
            .await
    }
}
