use crate::error::{AppError, AppResult};
use crate::external::{StripeService, snapshot_subscription};
use crate::services::BillingService;
use actix_web::{HttpRequest, HttpResponse, Result, web};
use log::{debug, error, info, warn};
use stripe::{Event, EventObject, EventType};

/// Stripe webhook处理器
///
/// 结账完成与订阅变更都会写入 billing_records，并让对应用户的缓存失效
pub async fn stripe_webhook(
    req: HttpRequest,
    body: web::Bytes,
    stripe_service: web::Data<StripeService>,
    billing_service: web::Data<BillingService>,
) -> Result<HttpResponse> {
    let signature = match req.headers().get("stripe-signature") {
        Some(sig) => sig.to_str().unwrap_or(""),
        None => {
            warn!("Missing Stripe-Signature header");
            return Ok(HttpResponse::BadRequest().json(serde_json::json!({
                "error": "Missing Stripe-Signature header"
            })));
        }
    };

    let payload = std::str::from_utf8(&body).map_err(|_| {
        error!("Invalid UTF-8 in webhook payload");
        actix_web::error::ErrorBadRequest("Invalid payload encoding")
    })?;

    let event = match stripe_service.construct_event(payload, signature) {
        Ok(event) => event,
        Err(e) => {
            error!("Webhook signature verification failed: {e}");
            return Ok(HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "Invalid signature"
            })));
        }
    };

    info!("Received Stripe webhook event: {} ({})", event.type_, event.id);

    Ok(webhook_reply(handle_stripe_event(event, &billing_service).await))
}

/// 基础设施故障返回 500 让 Stripe 重投；无法处理的合法事件仍返回 200
fn webhook_reply(result: AppResult<()>) -> HttpResponse {
    match result {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({ "received": true })),
        Err(
            e @ (AppError::DatabaseError(_)
            | AppError::ExternalApiError(_)
            | AppError::StripeError(_)
            | AppError::ReqwestError(_)),
        ) => {
            error!("Webhook processing failed, asking Stripe to retry: {e}");
            HttpResponse::InternalServerError().json(serde_json::json!({
                "received": false,
                "error": "Temporary processing failure"
            }))
        }
        Err(e) => {
            warn!("Webhook event could not be applied: {e}");
            HttpResponse::Ok().json(serde_json::json!({
                "received": true,
                "error": format!("Processing failed: {e}")
            }))
        }
    }
}

async fn handle_stripe_event(event: Event, billing_service: &BillingService) -> AppResult<()> {
    match (event.type_, event.data.object) {
        (EventType::CheckoutSessionCompleted, EventObject::CheckoutSession(session)) => {
            billing_service
                .confirm_checkout_from_webhook(session.id.as_str())
                .await
        }
        (
            EventType::CustomerSubscriptionUpdated | EventType::CustomerSubscriptionDeleted,
            EventObject::Subscription(sub),
        ) => {
            billing_service
                .apply_subscription_update(snapshot_subscription(&sub))
                .await?;
            Ok(())
        }
        (other, _) => {
            debug!("Ignoring Stripe event type {other}");
            Ok(())
        }
    }
}

pub fn webhook_config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/webhook").route("/stripe", web::post().to(stripe_webhook)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StripeConfig;
    use crate::external::SubscriptionSnapshot;
    use crate::models::BillingStatus;
    use crate::services::billing_service::tests::service;
    use actix_web::{App, test};
    use sea_orm::{DatabaseBackend, DbErr, MockDatabase};

    fn canceled_snapshot() -> SubscriptionSnapshot {
        SubscriptionSnapshot {
            id: "sub_5".into(),
            status: BillingStatus::Canceled,
            current_period_end: None,
            cancel_at_period_end: false,
        }
    }

    #[tokio::test]
    async fn test_database_failure_asks_for_redelivery() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_errors([DbErr::Custom("connection reset".into())])
            .into_connection();
        let result = service(db)
            .apply_subscription_update(canceled_snapshot())
            .await
            .map(|_| ());
        assert!(matches!(result, Err(AppError::DatabaseError(_))));
        assert_eq!(webhook_reply(result).status(), 500);
    }

    #[test]
    fn test_unapplicable_event_is_acknowledged() {
        let result = Err(AppError::ValidationError("Checkout session is not paid".into()));
        assert_eq!(webhook_reply(result).status(), 200);
        assert_eq!(webhook_reply(Ok(())).status(), 200);
    }

    #[actix_web::test]
    async fn test_webhook_signature_checks() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let stripe = StripeService::new(StripeConfig {
            secret_key: "sk_test_123".into(),
            webhook_secret: "whsec_123".into(),
            ..Default::default()
        });
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(stripe))
                .app_data(web::Data::new(service(db)))
                .configure(webhook_config),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/webhook/stripe")
            .set_payload("{}")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);

        let req = test::TestRequest::post()
            .uri("/webhook/stripe")
            .insert_header(("stripe-signature", "t=1,v1=deadbeef"))
            .set_payload("{}")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 401);
    }
}
