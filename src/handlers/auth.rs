use actix_web::{HttpRequest, HttpResponse, ResponseError, Result, web};
use serde_json::json;

use crate::middlewares::current_user_id;
use crate::services::BillingService;

#[utoipa::path(
    post,
    path = "/api/auth/logout",
    tag = "auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "登出成功"),
        (status = 401, description = "未授权")
    )
)]
pub async fn logout(
    billing_service: web::Data<BillingService>,
    req: HttpRequest,
) -> Result<HttpResponse> {
    let user_id = match current_user_id(&req) {
        Ok(id) => id,
        Err(e) => return Ok(e.error_response()),
    };
    // 令牌由客户端丢弃；这里只清掉该用户的订阅缓存
    if billing_service.end_session(user_id) {
        log::debug!("Dropped billing cache for user {user_id}");
    }
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "已成功登出"
    })))
}

pub fn auth_config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/auth").route("/logout", web::post().to(logout)));
}
