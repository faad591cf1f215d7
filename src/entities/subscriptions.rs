use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{DeriveActiveEnum, EnumIter};
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, DeriveActiveEnum, EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "String(None)")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "pending_renewal")]
    PendingRenewal,
    #[sea_orm(string_value = "suspended")]
    Suspended,
    #[sea_orm(string_value = "expired")]
    Expired,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl std::fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionState::Active => write!(f, "active"),
            SubscriptionState::PendingRenewal => write!(f, "pending_renewal"),
            SubscriptionState::Suspended => write!(f, "suspended"),
            SubscriptionState::Expired => write!(f, "expired"),
            SubscriptionState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One subscription row per paid/free enrollment. Superseded rows keep
/// `is_current = false` and are never mutated afterwards.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "subscriptions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: i64,
    pub plan_id: String,
    pub state: SubscriptionState,
    pub started_at: DateTime<Utc>,
    /// None = non-expiring (free or grandfathered lifetime plans).
    pub expires_at: Option<DateTime<Utc>>,
    pub auto_renew: bool,
    pub failed_attempts: i32,
    pub gateway_reference: Option<String>,
    pub last_observation: Option<String>,
    pub is_current: bool,
    /// Optimistic concurrency token; every guarded update bumps it.
    pub lock_version: i32,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
