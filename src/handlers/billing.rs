use actix_web::{HttpRequest, HttpResponse, ResponseError, Result, web};

use crate::middlewares::current_user_id;
use crate::models::*;
use crate::services::BillingService;

#[utoipa::path(
    get,
    path = "/api/billing/status",
    tag = "billing",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "当前订阅状态", body = BillingRecord),
        (status = 401, description = "未授权")
    )
)]
pub async fn get_status(
    billing_service: web::Data<BillingService>,
    req: HttpRequest,
) -> Result<HttpResponse> {
    let user_id = match current_user_id(&req) {
        Ok(id) => id,
        Err(e) => return Ok(e.error_response()),
    };
    Ok(HttpResponse::Ok().json(billing_service.status(user_id).await))
}

#[utoipa::path(
    get,
    path = "/api/billing/entitlements",
    tag = "billing",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "当前套餐可用功能", body = EntitlementsResponse),
        (status = 401, description = "未授权")
    )
)]
pub async fn get_entitlements(
    billing_service: web::Data<BillingService>,
    req: HttpRequest,
) -> Result<HttpResponse> {
    let user_id = match current_user_id(&req) {
        Ok(id) => id,
        Err(e) => return Ok(e.error_response()),
    };
    Ok(HttpResponse::Ok().json(billing_service.entitlements(user_id).await))
}

#[utoipa::path(
    post,
    path = "/api/billing/checkout",
    tag = "billing",
    request_body = CheckoutRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Stripe Checkout 跳转地址", body = CheckoutResponse),
        (status = 400, description = "不支持的套餐或已订阅"),
        (status = 401, description = "未授权"),
        (status = 502, description = "Stripe 调用失败")
    )
)]
pub async fn create_checkout(
    billing_service: web::Data<BillingService>,
    req: HttpRequest,
    request: web::Json<CheckoutRequest>,
) -> Result<HttpResponse> {
    let user_id = match current_user_id(&req) {
        Ok(id) => id,
        Err(e) => return Ok(e.error_response()),
    };
    match billing_service
        .create_checkout(user_id, request.into_inner())
        .await
    {
        Ok(resp) => Ok(HttpResponse::Ok().json(resp)),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    post,
    path = "/api/billing/confirm",
    tag = "billing",
    request_body = ConfirmCheckoutRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "支付确认成功，返回新的订阅状态", body = BillingRecord),
        (status = 400, description = "会话未支付"),
        (status = 403, description = "会话不属于当前用户")
    )
)]
pub async fn confirm_checkout(
    billing_service: web::Data<BillingService>,
    req: HttpRequest,
    request: web::Json<ConfirmCheckoutRequest>,
) -> Result<HttpResponse> {
    let user_id = match current_user_id(&req) {
        Ok(id) => id,
        Err(e) => return Ok(e.error_response()),
    };
    match billing_service
        .confirm_checkout(user_id, request.into_inner())
        .await
    {
        Ok(record) => Ok(HttpResponse::Ok().json(record)),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn billing_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/billing")
            .route("/status", web::get().to(get_status))
            .route("/entitlements", web::get().to(get_entitlements))
            .route("/checkout", web::post().to(create_checkout))
            .route("/confirm", web::post().to(confirm_checkout)),
    );
}
