mod auth;
mod db;
mod history;
mod inference;
mod keepalive;
mod routes;
mod storage;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use auth::jwt::JwtService;
use auth::middleware::AuthMiddleware;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use aws_sdk_s3::Client as S3Client;
use db::repository::Repository;
use history::service::HistoryService;
use inference::service::ModelService;
use keepalive::KeepAliveService;
use routes::configure_routes;
use std::env;
use std::time::Duration;
use storage::s3_service::S3Service;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    dotenv::dotenv().ok();

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    }

    // The model is loaded lazily on first prediction (or via /warmup), so
    // startup stays fast on hosts that cold-start the app.
    let model_path =
        env::var("MODEL_PATH").unwrap_or_else(|_| "trainedmodels/densenet121-baseline.ot".to_string());
    log::info!(
        "Model artifact: {} (loading deferred until first use)",
        model_path
    );
    let model_service = web::Data::new(ModelService::new(model_path));

    // Initialize AWS configuration
    let aws_config = aws_config::defaults(BehaviorVersion::latest()).load().await;
    let dynamodb_client = DynamoDbClient::new(&aws_config);
    let s3_client = S3Client::new(&aws_config);

    // Get table names from environment
    let users_table = env::var("DYNAMODB_USERS_TABLE").unwrap().to_string();
    let analyses_table = env::var("DYNAMODB_ANALYSES_TABLE").unwrap().to_string();
    let s3_bucket = env::var("S3_BUCKET_NAME").unwrap().to_string();

    // Create repository and services
    let db_repo = Repository::new(dynamodb_client, users_table, analyses_table);
    let s3_service = S3Service::new(s3_client, s3_bucket);
    let history_service = HistoryService::new(db_repo.clone(), s3_service.clone());

    let jwt_secret = env::var("JWT_SECRET").unwrap().to_string();
    let jwt_service = JwtService::new(&jwt_secret);
    let auth_middleware = AuthMiddleware::new(jwt_service.clone());

    let frontend_url = env::var("FRONTEND_URL").ok();

    let port = env::var("PORT").unwrap_or_else(|_| "8081".to_string());
    let bind_address = format!("0.0.0.0:{}", port);
    log::info!("Starting server on {}", bind_address);

    // Self-ping loop that keeps free-tier hosting from idling the service.
    let keep_alive = env::var("BASE_URL").ok().map(|base_url| {
        let interval_secs = env::var("KEEP_ALIVE_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(300);
        let service = KeepAliveService::new(base_url, Duration::from_secs(interval_secs));
        let handle = service.start();
        (service, handle)
    });
    if keep_alive.is_none() {
        log::info!("BASE_URL not set, keep-alive prober disabled");
    }

    let server = HttpServer::new(move || {
        let mut cors = Cors::default()
            .allowed_origin("http://localhost:3000")
            .allowed_origin("http://127.0.0.1:3000")
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                actix_web::http::header::AUTHORIZATION,
                actix_web::http::header::ACCEPT,
                actix_web::http::header::CONTENT_TYPE,
            ])
            .max_age(3600);
        if let Some(origin) = frontend_url.as_deref() {
            cors = cors.allowed_origin(origin);
        }

        App::new()
            .wrap(cors)
            .wrap(auth_middleware.clone())
            .app_data(model_service.clone())
            .app_data(web::Data::new(db_repo.clone()))
            .app_data(web::Data::new(s3_service.clone()))
            .app_data(web::Data::new(history_service.clone()))
            .app_data(web::Data::new(jwt_service.clone()))
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await;

    if let Some((service, handle)) = keep_alive {
        service.stop(handle).await;
    }

    server
}
