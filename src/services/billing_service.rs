use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, IntoActiveModel,
    QueryFilter, Set,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::BillingConfig;
use crate::entities::billing_record_entity as billing;
use crate::entitlements::{
    AccessGate, BillingSource, BillingStatusCache, FetchError, Plan, features_for, range_max_days,
};
use crate::error::{AppError, AppResult};
use crate::external::{CheckoutOutcome, StripeService, SubscriptionSnapshot};
use crate::models::*;

/// Reads one user's billing record straight from the database.
struct DbBillingSource {
    db: DatabaseConnection,
    user_id: i64,
}

#[async_trait]
impl BillingSource for DbBillingSource {
    async fn fetch(&self) -> Result<BillingRecord, FetchError> {
        Ok(load_record(&self.db, self.user_id).await?)
    }
}

/// A user without a row is on the free plan with no subscription.
pub async fn load_record(db: &DatabaseConnection, user_id: i64) -> Result<BillingRecord, DbErr> {
    let row = billing::Entity::find()
        .filter(billing::Column::UserId.eq(user_id))
        .one(db)
        .await?;
    Ok(row.map(BillingRecord::from).unwrap_or_default())
}

struct UserSession {
    gate: AccessGate,
    last_used: Instant,
}

#[derive(Clone)]
pub struct BillingService {
    db: DatabaseConnection,
    stripe: StripeService,
    settings: BillingConfig,
    // 每个用户一个缓存，登出或闲置过久时移除
    sessions: Arc<Mutex<HashMap<i64, UserSession>>>,
}

impl BillingService {
    pub fn new(db: DatabaseConnection, stripe: StripeService, settings: BillingConfig) -> Self {
        Self {
            db,
            stripe,
            settings,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<i64, UserSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The access gate for `user_id`, creating its cache on first use.
    pub fn gate_for(&self, user_id: i64) -> AccessGate {
        let now = Instant::now();
        let mut sessions = self.lock_sessions();
        let session = sessions.entry(user_id).or_insert_with(|| {
            let source = Arc::new(DbBillingSource {
                db: self.db.clone(),
                user_id,
            });
            let cache = BillingStatusCache::with_settings(
                source,
                self.settings.status_ttl(),
                self.settings.fetch_timeout(),
            );
            UserSession {
                gate: AccessGate::new(cache),
                last_used: now,
            }
        });
        session.last_used = now;
        session.gate.clone()
    }

    pub async fn status(&self, user_id: i64) -> BillingRecord {
        self.gate_for(user_id).cache().get().await
    }

    pub async fn entitlements(&self, user_id: i64) -> EntitlementsResponse {
        let plan = self.status(user_id).await.plan;
        EntitlementsResponse {
            plan,
            level: plan.level(),
            range_max_days: range_max_days(plan),
            features: features_for(plan)
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        }
    }

    pub async fn create_checkout(
        &self,
        user_id: i64,
        req: CheckoutRequest,
    ) -> AppResult<CheckoutResponse> {
        let plan = purchasable_tier(&req.tier)?;

        let current = self.status(user_id).await;
        if current.status == BillingStatus::Active && current.plan.level() >= plan.level() {
            return Err(AppError::ValidationError(format!(
                "Already subscribed to {}",
                current.plan
            )));
        }

        let url = self.stripe.create_checkout_session(user_id, plan).await?;
        Ok(CheckoutResponse { url })
    }

    /// Verifies a finished checkout with Stripe and records the new plan.
    pub async fn confirm_checkout(
        &self,
        user_id: i64,
        req: ConfirmCheckoutRequest,
    ) -> AppResult<BillingRecord> {
        let outcome = self.stripe.retrieve_checkout(&req.session_id).await?;
        if outcome.user_ref.as_deref() != Some(user_id.to_string().as_str()) {
            log::warn!(
                "User {user_id} tried to confirm checkout session {} owned by {:?}",
                outcome.session_id,
                outcome.user_ref
            );
            return Err(AppError::Forbidden);
        }
        self.apply_checkout(user_id, outcome).await
    }

    /// Webhook path for `checkout.session.completed`.
    pub async fn confirm_checkout_from_webhook(&self, session_id: &str) -> AppResult<()> {
        let outcome = self.stripe.retrieve_checkout(session_id).await?;
        let user_id = outcome
            .user_ref
            .as_deref()
            .and_then(|v| v.parse::<i64>().ok())
            .ok_or_else(|| {
                AppError::ValidationError("Checkout session has no valid user reference".into())
            })?;
        self.apply_checkout(user_id, outcome).await?;
        Ok(())
    }

    pub async fn apply_checkout(
        &self,
        user_id: i64,
        outcome: CheckoutOutcome,
    ) -> AppResult<BillingRecord> {
        if !outcome.paid {
            return Err(AppError::ValidationError("Checkout session is not paid".into()));
        }
        let plan = outcome
            .tier
            .as_deref()
            .map(Plan::parse)
            .filter(|p| *p != Plan::Free)
            .ok_or_else(|| {
                AppError::ValidationError("Checkout session has no purchasable tier".into())
            })?;

        let record = match outcome.subscription {
            Some(sub) => BillingRecord {
                plan,
                subscription_id: Some(sub.id),
                status: sub.status,
                current_period_end: sub.current_period_end,
                cancel_at_period_end: sub.cancel_at_period_end,
            },
            None => BillingRecord {
                plan,
                status: BillingStatus::Active,
                ..Default::default()
            },
        };

        self.upsert_record(user_id, &record, outcome.customer_id).await?;
        self.invalidate(user_id);
        log::info!(
            "Checkout {} confirmed: user {user_id} is now on {plan}",
            outcome.session_id
        );
        Ok(record)
    }

    /// Applies a `customer.subscription.*` webhook. Returns the affected user.
    pub async fn apply_subscription_update(
        &self,
        snapshot: SubscriptionSnapshot,
    ) -> AppResult<Option<i64>> {
        let Some(row) = billing::Entity::find()
            .filter(billing::Column::SubscriptionId.eq(snapshot.id.as_str()))
            .one(&self.db)
            .await?
        else {
            log::warn!("No billing record for subscription {}", snapshot.id);
            return Ok(None);
        };

        let user_id = row.user_id;
        let mut active = row.into_active_model();
        if snapshot.status == BillingStatus::Canceled {
            // 订阅结束，回落到免费档
            active.plan = Set(Plan::Free.as_str().to_string());
        }
        active.status = Set(snapshot.status.as_str().to_string());
        active.current_period_end = Set(snapshot.current_period_end);
        active.cancel_at_period_end = Set(snapshot.cancel_at_period_end);
        active.updated_at = Set(Some(Utc::now()));
        active.update(&self.db).await?;

        self.invalidate(user_id);
        log::info!(
            "Subscription {} for user {user_id} is now {}",
            snapshot.id,
            snapshot.status
        );
        Ok(Some(user_id))
    }

    async fn upsert_record(
        &self,
        user_id: i64,
        record: &BillingRecord,
        customer_id: Option<String>,
    ) -> AppResult<()> {
        let existing = billing::Entity::find()
            .filter(billing::Column::UserId.eq(user_id))
            .one(&self.db)
            .await?;

        let mut active = match existing {
            Some(row) => row.into_active_model(),
            None => billing::ActiveModel {
                user_id: Set(user_id),
                ..Default::default()
            },
        };
        active.plan = Set(record.plan.as_str().to_string());
        active.subscription_id = Set(record.subscription_id.clone());
        active.status = Set(record.status.as_str().to_string());
        active.current_period_end = Set(record.current_period_end);
        active.cancel_at_period_end = Set(record.cancel_at_period_end);
        if customer_id.is_some() {
            active.stripe_customer_id = Set(customer_id);
        }
        active.updated_at = Set(Some(Utc::now()));
        active.save(&self.db).await?;
        Ok(())
    }

    pub fn invalidate(&self, user_id: i64) {
        if let Some(session) = self.lock_sessions().get(&user_id) {
            session.gate.cache().invalidate();
        }
    }

    /// Drops the user's cache (logout). The next request starts from `Unknown`.
    pub fn end_session(&self, user_id: i64) -> bool {
        self.lock_sessions().remove(&user_id).is_some()
    }

    /// Evicts caches idle for longer than `max_idle`; returns how many.
    pub fn sweep_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut sessions = self.lock_sessions();
        let before = sessions.len();
        sessions.retain(|_, s| now.saturating_duration_since(s.last_used) <= max_idle);
        before - sessions.len()
    }

    pub fn settings(&self) -> &BillingConfig {
        &self.settings
    }
}

fn purchasable_tier(tier: &str) -> AppResult<Plan> {
    match tier {
        "premium" => Ok(Plan::Premium),
        "pro" => Ok(Plan::Pro),
        other => Err(AppError::ValidationError(format!("Unsupported tier: {other}"))),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::StripeConfig;
    use sea_orm::{DatabaseBackend, MockDatabase};

    pub(crate) fn row(user_id: i64, plan: Plan) -> billing::Model {
        billing::Model {
            id: user_id,
            user_id,
            plan: plan.as_str().to_string(),
            stripe_customer_id: Some("cus_123".into()),
            subscription_id: Some(format!("sub_{user_id}")),
            status: "active".into(),
            current_period_end: None,
            cancel_at_period_end: false,
            created_at: None,
            updated_at: None,
        }
    }

    pub(crate) fn service(db: DatabaseConnection) -> BillingService {
        let stripe = StripeService::new(StripeConfig {
            secret_key: "sk_test_123".into(),
            webhook_secret: "whsec_123".into(),
            ..Default::default()
        });
        BillingService::new(db, stripe, BillingConfig::default())
    }

    fn paid_checkout(tier: &str) -> CheckoutOutcome {
        CheckoutOutcome {
            session_id: "cs_test_1".into(),
            user_ref: Some("7".into()),
            tier: Some(tier.into()),
            paid: true,
            customer_id: Some("cus_123".into()),
            subscription: Some(SubscriptionSnapshot {
                id: "sub_7".into(),
                status: BillingStatus::Active,
                current_period_end: None,
                cancel_at_period_end: false,
            }),
        }
    }

    #[tokio::test]
    async fn test_missing_row_is_free() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<billing::Model>::new()])
            .into_connection();
        let record = service(db).status(1).await;
        assert_eq!(record, BillingRecord::default());
    }

    #[tokio::test]
    async fn test_status_is_cached_per_user() {
        // 只准备了一次查询结果，第二次调用必须命中缓存
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![row(3, Plan::Premium)]])
            .into_connection();
        let svc = service(db);
        assert_eq!(svc.status(3).await.plan, Plan::Premium);
        assert_eq!(svc.status(3).await.plan, Plan::Premium);
    }

    #[tokio::test]
    async fn test_apply_checkout_invalidates_cache() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([
                Vec::<billing::Model>::new(), // status() before checkout
                Vec::<billing::Model>::new(), // upsert lookup
                vec![row(7, Plan::Pro)],      // insert returning
                vec![row(7, Plan::Pro)],      // refetch after invalidate
            ])
            .into_connection();
        let svc = service(db);

        assert_eq!(svc.status(7).await.plan, Plan::Free);
        let record = svc.apply_checkout(7, paid_checkout("pro")).await.unwrap();
        assert_eq!(record.plan, Plan::Pro);
        assert_eq!(record.subscription_id.as_deref(), Some("sub_7"));

        assert_eq!(svc.status(7).await.plan, Plan::Pro);
    }

    #[tokio::test]
    async fn test_apply_checkout_rejects_unpaid_and_free() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let svc = service(db);

        let mut unpaid = paid_checkout("pro");
        unpaid.paid = false;
        assert!(matches!(
            svc.apply_checkout(7, unpaid).await,
            Err(AppError::ValidationError(_))
        ));
        assert!(matches!(
            svc.apply_checkout(7, paid_checkout("basic")).await,
            Err(AppError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_create_checkout_rejects_unknown_tier() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let result = service(db)
            .create_checkout(
                1,
                CheckoutRequest {
                    tier: "platinum".into(),
                },
            )
            .await;
        assert!(matches!(result, Err(AppError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_end_session_and_sweep() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let svc = service(db);
        svc.gate_for(1);
        svc.gate_for(2);

        assert!(svc.end_session(1));
        assert!(!svc.end_session(1));
        assert_eq!(svc.sweep_idle(Duration::from_secs(3600)), 0);
        assert!(svc.end_session(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_idle_sessions() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let svc = service(db);
        svc.gate_for(1);
        tokio::time::advance(Duration::from_secs(2 * 3600)).await;
        svc.gate_for(2);

        assert_eq!(svc.sweep_idle(Duration::from_secs(3600)), 1);
        assert!(svc.end_session(2));
    }
}
