use crate::entitlements::FeatureKey;
use crate::error::AppError;
use crate::services::BillingService;
use actix_web::{
    Error, HttpMessage, web,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
};
use futures_util::future::LocalBoxFuture;
use std::future::{Ready, ready};
use std::rc::Rc;

/// Route guard for a paid feature. Must sit inside [`super::AuthMiddleware`];
/// a denied request never reaches the handler and gets a 402.
pub struct RequireFeature {
    feature: FeatureKey,
}

impl RequireFeature {
    pub fn new(feature: FeatureKey) -> Self {
        Self { feature }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequireFeature
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequireFeatureService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequireFeatureService {
            service: Rc::new(service),
            feature: self.feature,
        }))
    }
}

pub struct RequireFeatureService<S> {
    service: Rc<S>,
    feature: FeatureKey,
}

impl<S, B> Service<ServiceRequest> for RequireFeatureService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let feature = self.feature.as_str();

        Box::pin(async move {
            let user_id = req
                .extensions()
                .get::<i64>()
                .copied()
                .ok_or_else(|| AppError::AuthError("Missing access token".to_string()))?;
            let billing = req
                .app_data::<web::Data<BillingService>>()
                .cloned()
                .ok_or_else(|| AppError::InternalError("BillingService is not registered".into()))?;

            billing
                .gate_for(user_id)
                .check(feature)
                .await
                .require(feature)?;

            service.call(req).await
        })
    }
}
