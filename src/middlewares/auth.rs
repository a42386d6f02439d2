use crate::error::AppError;
use crate::utils::JwtService;
use actix_web::http::Method;
use actix_web::{
    Error, HttpMessage, HttpRequest,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
};
use futures_util::future::LocalBoxFuture;
use std::future::{Ready, ready};

// 无需登录的路径
struct PublicPaths {
    exact_paths: Vec<&'static str>,
    prefix_paths: Vec<&'static str>,
}

impl PublicPaths {
    fn new() -> Self {
        Self {
            exact_paths: vec!["/swagger-ui", "/api-docs/openapi.json"],
            // Stripe 回调自带签名校验
            prefix_paths: vec!["/swagger-ui/", "/api-docs/", "/webhook/"],
        }
    }

    fn is_public_path(&self, path: &str) -> bool {
        self.exact_paths.contains(&path)
            || self
                .prefix_paths
                .iter()
                .any(|&prefix| path.starts_with(prefix))
    }
}

/// Verifies the bearer token and stores the user id (`i64`) in the request
/// extensions for handlers and [`super::RequireFeature`].
pub struct AuthMiddleware {
    jwt_service: JwtService,
}

impl AuthMiddleware {
    pub fn new(jwt_service: JwtService) -> Self {
        Self { jwt_service }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthMiddlewareService {
            service,
            jwt_service: self.jwt_service.clone(),
            public_paths: PublicPaths::new(),
        }))
    }
}

pub struct AuthMiddlewareService<S> {
    service: S,
    jwt_service: JwtService,
    public_paths: PublicPaths,
}

impl<S, B> Service<ServiceRequest> for AuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        // 放行 CORS 预检与公开路径
        if req.method() == Method::OPTIONS || self.public_paths.is_public_path(req.path()) {
            return Box::pin(self.service.call(req));
        }

        let token = req
            .headers()
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_owned);

        let Some(token) = token else {
            let error = AppError::AuthError("Missing access token".to_string());
            return Box::pin(async move { Err(error.into()) });
        };

        match self.jwt_service.verify_access_token(&token) {
            Ok(user_id) => {
                req.extensions_mut().insert(user_id);
                Box::pin(self.service.call(req))
            }
            Err(e) => {
                log::debug!("Rejected access token: {e}");
                let error = AppError::AuthError("Invalid access token".to_string());
                Box::pin(async move { Err(error.into()) })
            }
        }
    }
}

/// 获取当前用户ID（认证中间件写入）
pub fn current_user_id(req: &HttpRequest) -> Result<i64, AppError> {
    req.extensions()
        .get::<i64>()
        .copied()
        .ok_or_else(|| AppError::AuthError("Missing access token".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, HttpResponse, test, web};

    async fn whoami(req: HttpRequest) -> Result<HttpResponse, AppError> {
        Ok(HttpResponse::Ok().body(current_user_id(&req)?.to_string()))
    }

    #[test]
    fn test_public_paths() {
        let paths = PublicPaths::new();
        assert!(paths.is_public_path("/swagger-ui/index.html"));
        assert!(paths.is_public_path("/webhook/stripe"));
        assert!(!paths.is_public_path("/api/billing/status"));
        assert!(!paths.is_public_path("/api/auth/logout"));
    }

    #[actix_web::test]
    async fn test_bearer_token_sets_user_id() {
        let jwt = JwtService::new("secret", 3600);
        let token = jwt.generate_access_token(9).unwrap();
        let app = test::init_service(
            App::new()
                .wrap(AuthMiddleware::new(jwt))
                .route("/api/me", web::get().to(whoami)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/me")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .to_request();
        let body = test::call_and_read_body(&app, req).await;
        assert_eq!(body, "9");

        let req = test::TestRequest::get().uri("/api/me").to_request();
        let err = test::try_call_service(&app, req).await.unwrap_err();
        assert_eq!(err.as_response_error().status_code(), 401);
    }
}
