use crate::entities::{
    plan_entity, subscription_entity, usage_counter_entity, usage_event_entity, SubscriptionState,
};
use crate::error::{AppError, AppResult};
use crate::models::Plan;
use crate::store::{NewSubscription, PlanStore, SubscriptionStore, UsageStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set, TransactionTrait,
};

/// sea-orm implementation of the storage ports.
#[derive(Clone)]
pub struct OrmStore {
    db: DatabaseConnection,
}

impl OrmStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PlanStore for OrmStore {
    async fn find_plan(&self, plan_id: &str) -> AppResult<Option<Plan>> {
        let model = plan_entity::Entity::find_by_id(plan_id.to_string())
            .one(&self.db)
            .await?;
        model.map(Plan::try_from).transpose()
    }
}

#[async_trait]
impl SubscriptionStore for OrmStore {
    async fn find(&self, id: i64) -> AppResult<Option<subscription_entity::Model>> {
        Ok(subscription_entity::Entity::find_by_id(id)
            .one(&self.db)
            .await?)
    }

    async fn current_for_user(
        &self,
        user_id: i64,
    ) -> AppResult<Option<subscription_entity::Model>> {
        Ok(subscription_entity::Entity::find()
            .filter(subscription_entity::Column::UserId.eq(user_id))
            .filter(subscription_entity::Column::IsCurrent.eq(true))
            .order_by_desc(subscription_entity::Column::Id)
            .one(&self.db)
            .await?)
    }

    async fn latest_for_user(
        &self,
        user_id: i64,
    ) -> AppResult<Option<subscription_entity::Model>> {
        Ok(subscription_entity::Entity::find()
            .filter(subscription_entity::Column::UserId.eq(user_id))
            .order_by_desc(subscription_entity::Column::Id)
            .one(&self.db)
            .await?)
    }

    async fn find_by_gateway_reference(
        &self,
        reference: &str,
    ) -> AppResult<Option<subscription_entity::Model>> {
        Ok(subscription_entity::Entity::find()
            .filter(subscription_entity::Column::GatewayReference.eq(reference))
            .order_by_desc(subscription_entity::Column::Id)
            .one(&self.db)
            .await?)
    }

    async fn insert_current(
        &self,
        new: NewSubscription,
    ) -> AppResult<subscription_entity::Model> {
        let txn = self.db.begin().await?;

        // Supersede, never mutate beyond the currency flag: the old row keeps
        // its terminal state as append-only history.
        subscription_entity::Entity::update_many()
            .col_expr(subscription_entity::Column::IsCurrent, Expr::value(false))
            .col_expr(
                subscription_entity::Column::UpdatedAt,
                Expr::value(Utc::now()),
            )
            .filter(subscription_entity::Column::UserId.eq(new.user_id))
            .filter(subscription_entity::Column::IsCurrent.eq(true))
            .exec(&txn)
            .await?;

        let inserted = subscription_entity::ActiveModel {
            user_id: Set(new.user_id),
            plan_id: Set(new.plan_id),
            state: Set(new.state),
            started_at: Set(new.started_at),
            expires_at: Set(new.expires_at),
            auto_renew: Set(new.auto_renew),
            failed_attempts: Set(0),
            gateway_reference: Set(None),
            last_observation: Set(new.last_observation),
            is_current: Set(true),
            lock_version: Set(0),
            created_at: Set(Some(Utc::now())),
            updated_at: Set(Some(Utc::now())),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;
        Ok(inserted)
    }

    async fn save_guarded(
        &self,
        updated: subscription_entity::Model,
    ) -> AppResult<subscription_entity::Model> {
        let expected_version = updated.lock_version;
        let result = subscription_entity::Entity::update_many()
            .col_expr(
                subscription_entity::Column::PlanId,
                Expr::value(updated.plan_id.clone()),
            )
            .col_expr(
                subscription_entity::Column::State,
                Expr::value(updated.state),
            )
            .col_expr(
                subscription_entity::Column::ExpiresAt,
                Expr::value(updated.expires_at),
            )
            .col_expr(
                subscription_entity::Column::AutoRenew,
                Expr::value(updated.auto_renew),
            )
            .col_expr(
                subscription_entity::Column::FailedAttempts,
                Expr::value(updated.failed_attempts),
            )
            .col_expr(
                subscription_entity::Column::GatewayReference,
                Expr::value(updated.gateway_reference.clone()),
            )
            .col_expr(
                subscription_entity::Column::LastObservation,
                Expr::value(updated.last_observation.clone()),
            )
            .col_expr(
                subscription_entity::Column::IsCurrent,
                Expr::value(updated.is_current),
            )
            .col_expr(
                subscription_entity::Column::LockVersion,
                Expr::value(expected_version + 1),
            )
            .col_expr(
                subscription_entity::Column::UpdatedAt,
                Expr::value(Utc::now()),
            )
            .filter(subscription_entity::Column::Id.eq(updated.id))
            .filter(subscription_entity::Column::LockVersion.eq(expected_version))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(AppError::ConcurrentModification);
        }

        self.find(updated.id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Subscription {} not found", updated.id)))
    }

    async fn due_for_renewal(
        &self,
        cutoff: DateTime<Utc>,
    ) -> AppResult<Vec<subscription_entity::Model>> {
        Ok(subscription_entity::Entity::find()
            .filter(subscription_entity::Column::IsCurrent.eq(true))
            .filter(subscription_entity::Column::State.eq(SubscriptionState::Active))
            .filter(subscription_entity::Column::AutoRenew.eq(true))
            .filter(subscription_entity::Column::ExpiresAt.is_not_null())
            .filter(subscription_entity::Column::ExpiresAt.lte(cutoff))
            .order_by_asc(subscription_entity::Column::ExpiresAt)
            .all(&self.db)
            .await?)
    }

    async fn pending_renewal(&self) -> AppResult<Vec<subscription_entity::Model>> {
        Ok(subscription_entity::Entity::find()
            .filter(subscription_entity::Column::IsCurrent.eq(true))
            .filter(subscription_entity::Column::State.eq(SubscriptionState::PendingRenewal))
            .order_by_asc(subscription_entity::Column::Id)
            .all(&self.db)
            .await?)
    }

    async fn expired_unresolved(
        &self,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<subscription_entity::Model>> {
        Ok(subscription_entity::Entity::find()
            .filter(subscription_entity::Column::IsCurrent.eq(true))
            .filter(subscription_entity::Column::State.is_in([
                SubscriptionState::Active,
                SubscriptionState::PendingRenewal,
                SubscriptionState::Cancelled,
            ]))
            .filter(subscription_entity::Column::ExpiresAt.is_not_null())
            .filter(subscription_entity::Column::ExpiresAt.lt(now))
            .order_by_asc(subscription_entity::Column::ExpiresAt)
            .all(&self.db)
            .await?)
    }
}

#[async_trait]
impl UsageStore for OrmStore {
    async fn get_count(&self, user_id: i64, feature: &str, period_key: &str) -> AppResult<u64> {
        let counter = usage_counter_entity::Entity::find_by_id((
            user_id,
            feature.to_string(),
            period_key.to_string(),
        ))
        .one(&self.db)
        .await?;
        Ok(counter.map(|c| c.count as u64).unwrap_or(0))
    }

    async fn increment(
        &self,
        user_id: i64,
        feature: &str,
        period_key: &str,
        delta: u64,
        idempotency_key: Option<&str>,
    ) -> AppResult<u64> {
        let txn = self.db.begin().await?;

        if let Some(key) = idempotency_key {
            let event = usage_event_entity::ActiveModel {
                idempotency_key: Set(key.to_string()),
                period_key: Set(period_key.to_string()),
                user_id: Set(user_id),
                feature: Set(feature.to_string()),
                delta: Set(delta as i64),
                counted_count: Set(0),
                created_at: Set(Some(Utc::now())),
            };
            let inserted = usage_event_entity::Entity::insert(event)
                .on_conflict(
                    OnConflict::columns([
                        usage_event_entity::Column::IdempotencyKey,
                        usage_event_entity::Column::PeriodKey,
                    ])
                    .do_nothing()
                    .to_owned(),
                )
                .exec(&txn)
                .await;
            match inserted {
                Ok(_) => {}
                Err(DbErr::RecordNotInserted) => {
                    // replay: the first call already counted this event
                    let prior = usage_event_entity::Entity::find_by_id((
                        key.to_string(),
                        period_key.to_string(),
                    ))
                    .one(&txn)
                    .await?
                    .ok_or_else(|| {
                        AppError::InternalError("Idempotency record vanished".to_string())
                    })?;
                    txn.commit().await?;
                    return Ok(prior.counted_count as u64);
                }
                Err(e) => return Err(e.into()),
            }
        }

        // single-statement atomic upsert: no read-then-write window
        let counter = usage_counter_entity::ActiveModel {
            user_id: Set(user_id),
            feature: Set(feature.to_string()),
            period_key: Set(period_key.to_string()),
            count: Set(delta as i64),
            created_at: Set(Some(Utc::now())),
            updated_at: Set(Some(Utc::now())),
        };
        usage_counter_entity::Entity::insert(counter)
            .on_conflict(
                OnConflict::columns([
                    usage_counter_entity::Column::UserId,
                    usage_counter_entity::Column::Feature,
                    usage_counter_entity::Column::PeriodKey,
                ])
                .value(
                    usage_counter_entity::Column::Count,
                    Expr::col(usage_counter_entity::Column::Count).add(delta as i64),
                )
                .value(
                    usage_counter_entity::Column::UpdatedAt,
                    Expr::value(Utc::now()),
                )
                .to_owned(),
            )
            .exec(&txn)
            .await?;

        let new_count = usage_counter_entity::Entity::find_by_id((
            user_id,
            feature.to_string(),
            period_key.to_string(),
        ))
        .one(&txn)
        .await?
        .map(|c| c.count)
        .unwrap_or(delta as i64);

        if let Some(key) = idempotency_key {
            usage_event_entity::Entity::update_many()
                .col_expr(
                    usage_event_entity::Column::CountedCount,
                    Expr::value(new_count),
                )
                .filter(usage_event_entity::Column::IdempotencyKey.eq(key))
                .filter(usage_event_entity::Column::PeriodKey.eq(period_key))
                .exec(&txn)
                .await?;
        }

        txn.commit().await?;
        Ok(new_count as u64)
    }
}
