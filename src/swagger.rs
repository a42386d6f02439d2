use actix_web::web;
use utoipa::OpenApi;
use utoipa::{
    Modify,
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::entitlements::{FeatureKey, Plan};
use crate::handlers;
use crate::models::*;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            )
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::auth::logout,
        handlers::billing::get_status,
        handlers::billing::get_entitlements,
        handlers::billing::create_checkout,
        handlers::billing::confirm_checkout,
        handlers::glucose::log_reading,
        handlers::glucose::list_readings,
        handlers::glucose::export_csv,
        handlers::glucose::import_cgm,
        handlers::glucose::insights,
    ),
    components(
        schemas(
            Plan,
            FeatureKey,
            BillingStatus,
            BillingRecord,
            CheckoutRequest,
            CheckoutResponse,
            ConfirmCheckoutRequest,
            EntitlementsResponse,
            UpgradeRequiredBody,
            LogGlucoseRequest,
            GlucoseReadingResponse,
            GlucoseListResponse,
            ImportSummary,
            InsightsResponse,
            FullInsights,
            ApiError,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "Session API"),
        (name = "billing", description = "Subscription and entitlement API"),
        (name = "glucose", description = "Glucose log API (partly plan-gated)"),
    ),
    info(
        title = "GlycoGuide Backend API",
        version = "1.0.0",
        description = "GlycoGuide subscription, entitlement and glucose log API"
    )
)]
pub struct ApiDoc;

pub fn swagger_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", ApiDoc::openapi()),
    )
    .route(
        "/swagger-ui",
        web::get().to(|| async {
            actix_web::HttpResponse::Found()
                .append_header(("Location", "/swagger-ui/"))
                .finish()
        }),
    );
}
