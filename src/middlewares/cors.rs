use actix_cors::Cors;

pub fn create_cors() -> Cors {
    Cors::default()
        // 前端与 Stripe 跳转页可能部署在不同域名
        .allowed_origin_fn(|_, _req_head| true)
        .allowed_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_any_header()
        .expose_headers(vec!["Content-Disposition"])
        .max_age(3600)
}
