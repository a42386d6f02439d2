use actix_web::{App, HttpServer, middleware::Logger, web};
use chrono::Local; // timestamp in log lines
use env_logger::{Env, Target};
use std::io::Write; // for env_logger custom formatter

use glycoguide_backend::{
    config::Config,
    database::{create_pool, run_migrations},
    external::StripeService,
    handlers,
    middlewares::{AuthMiddleware, create_cors},
    services::*,
    swagger::swagger_config,
    tasks,
    utils::JwtService,
};

// 访问令牌由账号服务签发，这里只校验
const ACCESS_TOKEN_TTL_SECS: i64 = 2 * 3600;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let ts = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z");
            let level = record.level().as_str().to_ascii_lowercase();
            let msg_json = serde_json::to_string(&format!("{}", record.args()))
                .unwrap_or_else(|_| "\"<invalid utf8>\"".to_string());
            writeln!(
                buf,
                "{{\"timestamp\":\"{}\",\"level\":\"{}\",\"message\":{},\"target\":\"{}\"}}",
                ts,
                level,
                msg_json,
                record.target(),
            )
        })
        .target(Target::Stdout)
        .init();

    // 加载配置
    let config = Config::from_toml().expect("Failed to load configuration file");

    // 连接数据库并迁移
    let pool = create_pool(&config.database)
        .await
        .expect("Failed to connect to database");
    run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");

    let jwt_service = JwtService::new(&config.jwt.secret, ACCESS_TOKEN_TTL_SECS);
    let stripe_service = StripeService::new(config.stripe.clone());

    // 创建服务
    let billing_service =
        BillingService::new(pool.clone(), stripe_service.clone(), config.billing.clone());
    let glucose_service = GlucoseService::new(pool.clone());

    // 启动后台任务
    tasks::spawn_all(billing_service.clone());

    log::info!(
        "Starting HTTP server at {}:{} (billing status TTL {:?})",
        config.server.host,
        config.server.port,
        config.billing.status_ttl()
    );

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(create_cors())
            .wrap(AuthMiddleware::new(jwt_service.clone()))
            .app_data(web::Data::new(billing_service.clone()))
            .app_data(web::Data::new(glucose_service.clone()))
            .app_data(web::Data::new(stripe_service.clone()))
            .configure(swagger_config)
            .configure(handlers::webhook_config)
            .service(
                web::scope("/api")
                    .configure(handlers::auth_config)
                    .configure(handlers::billing_config)
                    .configure(handlers::glucose_config),
            )
    })
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await
}
