use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

use crate::entitlements::Plan;
use crate::models::{BillingRecord, BillingStatus};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "billing_records")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub user_id: i64,
    pub plan: String,
    pub stripe_customer_id: Option<String>,
    pub subscription_id: Option<String>,
    pub status: String,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for BillingRecord {
    fn from(m: Model) -> Self {
        Self {
            plan: Plan::parse(&m.plan),
            subscription_id: m.subscription_id,
            status: BillingStatus::parse(&m.status),
            current_period_end: m.current_period_end,
            cancel_at_period_end: m.cancel_at_period_end,
        }
    }
}
