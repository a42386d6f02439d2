use actix_web::{HttpRequest, HttpResponse, ResponseError, Result, http::header, web};

use crate::entitlements::FeatureKey;
use crate::error::AppError;
use crate::middlewares::{RequireFeature, current_user_id};
use crate::models::*;
use crate::services::{BillingService, GlucoseService};

#[utoipa::path(
    post,
    path = "/api/glucose",
    tag = "glucose",
    request_body = LogGlucoseRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "记录成功", body = GlucoseReadingResponse),
        (status = 400, description = "数值超出范围")
    )
)]
pub async fn log_reading(
    glucose_service: web::Data<GlucoseService>,
    req: HttpRequest,
    request: web::Json<LogGlucoseRequest>,
) -> Result<HttpResponse> {
    let user_id = match current_user_id(&req) {
        Ok(id) => id,
        Err(e) => return Ok(e.error_response()),
    };
    match glucose_service.log_reading(user_id, request.into_inner()).await {
        Ok(reading) => Ok(HttpResponse::Ok().json(ApiResponse::success(reading))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/api/glucose",
    tag = "glucose",
    params(GlucoseQuery),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "按套餐可查看的时间范围返回记录", body = GlucoseListResponse)
    )
)]
pub async fn list_readings(
    glucose_service: web::Data<GlucoseService>,
    billing_service: web::Data<BillingService>,
    req: HttpRequest,
    query: web::Query<GlucoseQuery>,
) -> Result<HttpResponse> {
    let user_id = match current_user_id(&req) {
        Ok(id) => id,
        Err(e) => return Ok(e.error_response()),
    };
    let max_days = billing_service.gate_for(user_id).range_max_days().await;
    match glucose_service
        .list_readings(user_id, query.days, max_days)
        .await
    {
        Ok(list) => Ok(HttpResponse::Ok().json(ApiResponse::success(list))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/api/glucose/export.csv",
    tag = "glucose",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "CSV 文件", body = String, content_type = "text/csv"),
        (status = 402, description = "需要升级套餐", body = UpgradeRequiredBody)
    )
)]
pub async fn export_csv(
    glucose_service: web::Data<GlucoseService>,
    billing_service: web::Data<BillingService>,
    req: HttpRequest,
) -> Result<HttpResponse> {
    let user_id = match current_user_id(&req) {
        Ok(id) => id,
        Err(e) => return Ok(e.error_response()),
    };
    let days = billing_service.gate_for(user_id).range_max_days().await;
    match glucose_service.export_csv(user_id, days).await {
        Ok(csv) => Ok(HttpResponse::Ok()
            .content_type("text/csv; charset=utf-8")
            .insert_header((
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"glucose.csv\"",
            ))
            .body(csv)),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    post,
    path = "/api/glucose/import",
    tag = "glucose",
    request_body(content = String, content_type = "text/csv", description = "timestamp,value 行"),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "导入结果", body = ImportSummary),
        (status = 400, description = "文件过大或编码错误"),
        (status = 402, description = "需要升级套餐", body = UpgradeRequiredBody)
    )
)]
pub async fn import_cgm(
    glucose_service: web::Data<GlucoseService>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse> {
    let user_id = match current_user_id(&req) {
        Ok(id) => id,
        Err(e) => return Ok(e.error_response()),
    };
    let Ok(text) = std::str::from_utf8(&body) else {
        return Ok(AppError::ValidationError("CSV must be UTF-8".into()).error_response());
    };
    match glucose_service.import_cgm(user_id, text).await {
        Ok(summary) => Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
            summary,
            "导入完成".to_string(),
        ))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/api/glucose/insights",
    tag = "glucose",
    params(GlucoseQuery),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "统计概览，高级套餐附带完整指标", body = InsightsResponse)
    )
)]
pub async fn insights(
    glucose_service: web::Data<GlucoseService>,
    billing_service: web::Data<BillingService>,
    req: HttpRequest,
    query: web::Query<GlucoseQuery>,
) -> Result<HttpResponse> {
    let user_id = match current_user_id(&req) {
        Ok(id) => id,
        Err(e) => return Ok(e.error_response()),
    };
    let gate = billing_service.gate_for(user_id);
    // 基础统计对所有人开放，完整指标需要 insightsFull
    let full = gate
        .check(FeatureKey::InsightsFull.as_str())
        .await
        .is_allowed();
    let max_days = gate.range_max_days().await;

    match glucose_service
        .insights(user_id, query.days, max_days, full)
        .await
    {
        Ok(summary) => Ok(HttpResponse::Ok().json(ApiResponse::success(summary))),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn glucose_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/glucose")
            .service(
                web::resource("/export.csv")
                    .wrap(RequireFeature::new(FeatureKey::CsvExport))
                    .route(web::get().to(export_csv)),
            )
            .service(
                web::resource("/import")
                    .wrap(RequireFeature::new(FeatureKey::CgmImport))
                    .route(web::post().to(import_cgm)),
            )
            .route("/insights", web::get().to(insights))
            .route("", web::get().to(list_readings))
            .route("", web::post().to(log_reading)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::glucose_reading_entity as readings;
    use crate::entitlements::Plan;
    use crate::middlewares::AuthMiddleware;
    use crate::services::billing_service::tests::{row, service};
    use crate::utils::JwtService;
    use actix_web::{App, test};
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn reading(id: i64, value: i32) -> readings::Model {
        readings::Model {
            id,
            user_id: 4,
            value_mg_dl: value,
            measured_at: Utc::now(),
            source: "manual".into(),
            note: None,
            created_at: None,
        }
    }

    #[actix_web::test]
    async fn test_list_clamps_to_plan_range() {
        let billing_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![row(4, Plan::Premium)]])
            .into_connection();
        let glucose_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![reading(1, 110), reading(2, 145)]])
            .into_connection();
        let jwt = JwtService::new("secret", 3600);
        let token = jwt.generate_access_token(4).unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(service(billing_db)))
                .app_data(web::Data::new(GlucoseService::new(glucose_db)))
                .wrap(AuthMiddleware::new(jwt))
                .service(web::scope("/api").configure(glucose_config)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/glucose?days=90")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["rangeDays"], 14);
        assert_eq!(body["data"]["maxRangeDays"], 14);
        assert_eq!(body["data"]["readings"].as_array().unwrap().len(), 2);
    }

    #[actix_web::test]
    async fn test_insights_are_basic_on_free_plan() {
        let billing_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<crate::entities::billing_record_entity::Model>::new()])
            .into_connection();
        let glucose_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![reading(1, 100), reading(2, 140)]])
            .into_connection();
        let jwt = JwtService::new("secret", 3600);
        let token = jwt.generate_access_token(4).unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(service(billing_db)))
                .app_data(web::Data::new(GlucoseService::new(glucose_db)))
                .wrap(AuthMiddleware::new(jwt))
                .service(web::scope("/api").configure(glucose_config)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/glucose/insights")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["count"], 2);
        assert_eq!(body["data"]["meanMgDl"], 120.0);
        assert_eq!(body["data"]["rangeDays"], 7);
        assert!(body["data"].get("full").is_none());
    }

    #[actix_web::test]
    async fn test_import_requires_pro() {
        let billing_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![row(4, Plan::Premium)]])
            .into_connection();
        let glucose_db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let jwt = JwtService::new("secret", 3600);
        let token = jwt.generate_access_token(4).unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(service(billing_db)))
                .app_data(web::Data::new(GlucoseService::new(glucose_db)))
                .wrap(AuthMiddleware::new(jwt))
                .service(web::scope("/api").configure(glucose_config)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/glucose/import")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .set_payload("2026-03-01T08:00:00Z,112\n")
            .to_request();
        let err = test::try_call_service(&app, req).await.unwrap_err();
        assert_eq!(err.as_response_error().status_code(), 402);
    }
}
