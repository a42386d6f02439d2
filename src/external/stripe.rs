use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::str::FromStr;
use stripe::{
    CheckoutSession, CheckoutSessionId, CheckoutSessionMode, CheckoutSessionPaymentStatus, Client,
    CreateCheckoutSession, CreateCheckoutSessionLineItems, Event, Expandable, Subscription,
    SubscriptionStatus, Webhook,
};

use crate::config::StripeConfig;
use crate::entitlements::Plan;
use crate::error::{AppError, AppResult};
use crate::models::BillingStatus;

/// Subscription fields the billing record keeps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSnapshot {
    pub id: String,
    pub status: BillingStatus,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
}

/// A retrieved checkout session, reduced to what confirmation needs.
#[derive(Debug, Clone)]
pub struct CheckoutOutcome {
    pub session_id: String,
    pub user_ref: Option<String>,
    pub tier: Option<String>,
    pub paid: bool,
    pub customer_id: Option<String>,
    pub subscription: Option<SubscriptionSnapshot>,
}

#[derive(Clone)]
pub struct StripeService {
    client: Client,
    config: StripeConfig,
}

impl StripeService {
    pub fn new(config: StripeConfig) -> Self {
        Self {
            client: Client::new(config.secret_key.clone()),
            config,
        }
    }

    pub fn price_for(&self, plan: Plan) -> AppResult<&str> {
        let price = match plan {
            Plan::Premium => self.config.premium_price_id.as_deref(),
            Plan::Pro => self.config.pro_price_id.as_deref(),
            Plan::Free => {
                return Err(AppError::ValidationError(
                    "The free plan cannot be purchased".into(),
                ));
            }
        };
        price.ok_or_else(|| AppError::ConfigError(format!("No Stripe price configured for {plan}")))
    }

    /// Creates a subscription-mode Checkout Session and returns its redirect URL.
    pub async fn create_checkout_session(&self, user_id: i64, plan: Plan) -> AppResult<String> {
        let price = self.price_for(plan)?.to_string();
        let user_ref = user_id.to_string();

        let mut metadata = HashMap::new();
        metadata.insert("user_id".to_string(), user_ref.clone());
        metadata.insert("tier".to_string(), plan.as_str().to_string());

        let mut params = CreateCheckoutSession::new();
        params.mode = Some(CheckoutSessionMode::Subscription);
        params.success_url = Some(self.config.success_url.as_str());
        params.cancel_url = Some(self.config.cancel_url.as_str());
        params.client_reference_id = Some(user_ref.as_str());
        params.metadata = Some(metadata);
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price: Some(price),
            quantity: Some(1),
            ..Default::default()
        }]);

        let session = CheckoutSession::create(&self.client, params).await?;
        log::info!("Created checkout session {} for user {user_id} ({plan})", session.id);

        session
            .url
            .ok_or_else(|| AppError::ExternalApiError("Checkout session has no URL".into()))
    }

    pub async fn retrieve_checkout(&self, session_id: &str) -> AppResult<CheckoutOutcome> {
        let id = CheckoutSessionId::from_str(session_id)
            .map_err(|_| AppError::ValidationError("Invalid checkout session id".into()))?;
        let session = CheckoutSession::retrieve(&self.client, &id, &["subscription"]).await?;

        let subscription = match &session.subscription {
            Some(Expandable::Object(sub)) => Some(snapshot_subscription(sub)),
            Some(Expandable::Id(sub_id)) => {
                let sub = Subscription::retrieve(&self.client, sub_id, &[]).await?;
                Some(snapshot_subscription(&sub))
            }
            None => None,
        };
        let customer_id = session.customer.as_ref().map(|c| match c {
            Expandable::Id(id) => id.to_string(),
            Expandable::Object(obj) => obj.id.to_string(),
        });
        let metadata = session.metadata.clone().unwrap_or_default();

        Ok(CheckoutOutcome {
            session_id: session.id.to_string(),
            user_ref: session
                .client_reference_id
                .clone()
                .or_else(|| metadata.get("user_id").cloned()),
            tier: metadata.get("tier").cloned(),
            paid: matches!(
                session.payment_status,
                CheckoutSessionPaymentStatus::Paid | CheckoutSessionPaymentStatus::NoPaymentRequired
            ),
            customer_id,
            subscription,
        })
    }

    pub fn construct_event(&self, payload: &str, signature: &str) -> AppResult<Event> {
        if self.config.webhook_secret.is_empty() {
            return Err(AppError::ConfigError("Stripe webhook secret is not configured".into()));
        }
        Webhook::construct_event(payload, signature, &self.config.webhook_secret)
            .map_err(|e| AppError::AuthError(format!("Invalid webhook signature: {e}")))
    }
}

pub fn snapshot_subscription(sub: &Subscription) -> SubscriptionSnapshot {
    SubscriptionSnapshot {
        id: sub.id.to_string(),
        status: billing_status_of(&sub.status),
        current_period_end: DateTime::from_timestamp(sub.current_period_end, 0),
        cancel_at_period_end: sub.cancel_at_period_end,
    }
}

pub fn billing_status_of(status: &SubscriptionStatus) -> BillingStatus {
    match status {
        SubscriptionStatus::Active | SubscriptionStatus::Trialing => BillingStatus::Active,
        SubscriptionStatus::PastDue | SubscriptionStatus::Unpaid => BillingStatus::PastDue,
        SubscriptionStatus::Canceled | SubscriptionStatus::IncompleteExpired => {
            BillingStatus::Canceled
        }
        _ => BillingStatus::NoSubscription,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> StripeConfig {
        StripeConfig {
            secret_key: "sk_test_123".to_string(),
            webhook_secret: "whsec_123".to_string(),
            premium_price_id: Some("price_premium".to_string()),
            pro_price_id: None,
            ..Default::default()
        }
    }

    #[test]
    fn test_price_lookup() {
        let service = StripeService::new(config());
        assert_eq!(service.price_for(Plan::Premium).unwrap(), "price_premium");
        assert!(matches!(service.price_for(Plan::Pro), Err(AppError::ConfigError(_))));
        assert!(matches!(
            service.price_for(Plan::Free),
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn test_subscription_status_mapping() {
        assert_eq!(billing_status_of(&SubscriptionStatus::Trialing), BillingStatus::Active);
        assert_eq!(billing_status_of(&SubscriptionStatus::Unpaid), BillingStatus::PastDue);
        assert_eq!(
            billing_status_of(&SubscriptionStatus::IncompleteExpired),
            BillingStatus::Canceled
        );
        assert_eq!(
            billing_status_of(&SubscriptionStatus::Incomplete),
            BillingStatus::NoSubscription
        );
    }

    #[test]
    fn test_webhook_rejects_bad_signature() {
        let service = StripeService::new(config());
        let result = service.construct_event("{}", "t=1,v1=deadbeef");
        assert!(matches!(result, Err(AppError::AuthError(_))));
    }
}
