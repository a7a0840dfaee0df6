use actix_multipart::Multipart;
use actix_web::{web, Error, HttpResponse};
use base64::Engine;
use chrono::Utc;
use futures::{StreamExt, TryStreamExt};
use log::{error, info};
use serde::Deserialize;
use serde_json::json;
use std::io::Write;
use std::time::Instant;
use uuid::Uuid;

use shared::{Base64ImageRequest, CLASS_LABELS, IMG_SIZE};

use crate::auth::middleware::AuthenticatedUser;
use crate::auth::routes as auth_routes;
use crate::db::repository::Repository;
use crate::history::service::{HistoryError, HistoryService, DEFAULT_PAGE_SIZE};
use crate::inference::service::ModelService;
use crate::storage::s3_service::S3Service;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(index)))
        .service(web::resource("/register").route(web::post().to(auth_routes::register)))
        .service(web::resource("/login").route(web::post().to(auth_routes::login)))
        .service(
            web::resource("/profile/{user_id}")
                .route(web::get().to(auth_routes::get_profile))
                .route(web::put().to(auth_routes::update_profile))
                .route(web::delete().to(auth_routes::delete_user)),
        )
        .service(web::resource("/users").route(web::get().to(auth_routes::list_users)))
        .service(web::resource("/predict").route(web::post().to(predict)))
        .service(web::resource("/predict_base64").route(web::post().to(predict_base64)))
        .service(web::resource("/history").route(web::get().to(history)))
        .service(web::resource("/history/{analysis_id}").route(web::get().to(history_detail)))
        .service(web::resource("/model/info").route(web::get().to(model_info)))
        .service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/warmup").route(web::get().to(warmup)))
        .service(web::resource("/keep-alive").route(web::get().to(keep_alive)));
}

async fn index() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "service": "sunscan-backend",
        "status": "running",
        "endpoints": [
            "/register", "/login", "/profile/{user_id}", "/users",
            "/predict", "/predict_base64", "/history", "/history/{analysis_id}",
            "/model/info", "/health", "/warmup", "/keep-alive",
        ],
    }))
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "message": "Service is running",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn keep_alive() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "alive",
        "message": "Keep-alive ping received",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Pre-loads the model and checks database connectivity so the first real
/// request doesn't pay the cold-start cost. Always answers 200; the body
/// reports what actually came up.
async fn warmup(
    model: web::Data<ModelService>,
    db_repo: web::Data<Repository>,
) -> Result<HttpResponse, Error> {
    let started = Instant::now();

    let database_connected = match db_repo.count_users().await {
        Ok(count) => {
            info!("Warmup database check passed ({} users)", count);
            true
        }
        Err(e) => {
            error!("Warmup database check failed: {:?}", e);
            false
        }
    };

    let model_clone = model.clone();
    let strategy = web::block(move || model_clone.warm()).await?;

    let warmup_time = started.elapsed().as_secs_f64();
    info!(
        "Warmup finished in {:.2}s (strategy: {})",
        warmup_time,
        strategy.as_str()
    );

    Ok(HttpResponse::Ok().json(json!({
        "status": "warmed",
        "database_connected": database_connected,
        "models_loaded": true,
        "load_strategy": strategy.as_str(),
        "degraded": strategy.is_degraded(),
        "warmup_time": warmup_time,
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

async fn model_info(model: web::Data<ModelService>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "model": "densenet121",
        "artifact": model.artifact().display().to_string(),
        "classes": CLASS_LABELS,
        "input_size": [IMG_SIZE, IMG_SIZE],
        "loaded": model.is_loaded(),
        "load_strategy": model.load_strategy().map(|s| s.as_str()),
        "degraded": model.load_strategy().map(|s| s.is_degraded()),
    }))
}

/// Reads the first file field of the multipart body. Returns the raw
/// bytes plus the client-supplied filename and MIME type.
async fn read_image_field(
    payload: &mut Multipart,
) -> Result<Option<(Vec<u8>, String, String)>, Error> {
    while let Some(mut field) = payload.try_next().await? {
        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .unwrap_or("upload")
            .to_string();
        let mime_type = field
            .content_type()
            .map(|m| m.essence_str().to_string())
            .unwrap_or_else(|| "image/png".to_string());

        let mut image_data = Vec::new();
        while let Some(chunk) = field.next().await {
            let data = chunk?;
            image_data.write_all(&data)?;
        }
        if !image_data.is_empty() {
            return Ok(Some((image_data, filename, mime_type)));
        }
    }
    Ok(None)
}

async fn predict(
    user: AuthenticatedUser,
    mut payload: Multipart,
    model: web::Data<ModelService>,
    s3_service: web::Data<S3Service>,
    history_service: web::Data<HistoryService>,
) -> Result<HttpResponse, Error> {
    let started = Instant::now();

    let Some((image_data, filename, mime_type)) = read_image_field(&mut payload).await? else {
        return Ok(HttpResponse::BadRequest().json(json!({ "error": "No image file provided" })));
    };

    if let Err(e) = S3Service::validate_image_size(&image_data) {
        return Ok(HttpResponse::BadRequest().json(json!({ "error": e.to_string() })));
    }

    let image = match image::load_from_memory(&image_data) {
        Ok(image) => image,
        Err(e) => {
            error!("Failed to decode uploaded image {}: {:?}", filename, e);
            return Ok(
                HttpResponse::BadRequest().json(json!({ "error": "Invalid or corrupt image" }))
            );
        }
    };
    let image_size = format!("{}x{}", image.width(), image.height());

    let extension = match S3Service::extract_file_extension(&mime_type) {
        Ok(ext) => ext,
        Err(e) => {
            return Ok(HttpResponse::BadRequest().json(json!({ "error": e.to_string() })));
        }
    };
    let image_hash = S3Service::calculate_image_hash(&image_data);
    let s3_key = S3Service::generate_s3_key(user.0, &image_hash, extension);

    let image_url = match s3_service
        .upload_image(&image_data, &s3_key, &mime_type)
        .await
    {
        Ok(()) => s3_service.public_url(&s3_key),
        Err(e) => {
            error!("Failed to upload image to S3: {:?}", e);
            return Ok(HttpResponse::InternalServerError()
                .json(json!({ "error": "Failed to store image" })));
        }
    };

    let model_clone = model.clone();
    let prediction = match web::block(move || model_clone.predict(&image)).await? {
        Ok(prediction) => prediction,
        Err(e) => {
            error!("Model inference error: {:?}", e);
            return Ok(
                HttpResponse::InternalServerError().json(json!({ "error": "Inference failed" }))
            );
        }
    };

    let processing_time = started.elapsed().as_secs_f64();
    let analysis = crate::history::models::Analysis::new(
        user.0,
        &prediction,
        filename,
        image_size,
        processing_time,
        image_url.clone(),
        s3_key,
    );

    let analysis_id = match history_service.record(&analysis).await {
        Ok(id) => id,
        Err(e) => {
            error!("Failed to record analysis: {:?}", e);
            return Ok(HttpResponse::InternalServerError()
                .json(json!({ "error": "Failed to record analysis" })));
        }
    };

    info!(
        "Prediction for user {}: {} ({:.1}%) in {:.2}s",
        user.0,
        prediction.predicted_class,
        prediction.confidence * 100.0,
        processing_time
    );

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "result": prediction,
        "analysis_id": analysis_id,
        "image_url": image_url,
        "processing_time": processing_time,
    })))
}

/// Stateless variant of /predict: accepts a data-URL or raw base64 body,
/// runs inference, and does not persist anything.
async fn predict_base64(
    _user: AuthenticatedUser,
    payload: web::Json<Base64ImageRequest>,
    model: web::Data<ModelService>,
) -> Result<HttpResponse, Error> {
    let encoded = payload
        .image
        .rsplit(',')
        .next()
        .unwrap_or(&payload.image)
        .trim()
        .to_string();

    let image_data = match base64::engine::general_purpose::STANDARD.decode(&encoded) {
        Ok(data) => data,
        Err(e) => {
            error!("Failed to decode base64 image: {:?}", e);
            return Ok(HttpResponse::BadRequest().json(json!({ "error": "Invalid base64 data" })));
        }
    };

    let image = match image::load_from_memory(&image_data) {
        Ok(image) => image,
        Err(e) => {
            error!("Failed to decode base64 payload as image: {:?}", e);
            return Ok(
                HttpResponse::BadRequest().json(json!({ "error": "Invalid or corrupt image" }))
            );
        }
    };

    let model_clone = model.clone();
    let prediction = match web::block(move || model_clone.predict(&image)).await? {
        Ok(prediction) => prediction,
        Err(e) => {
            error!("Model inference error: {:?}", e);
            return Ok(
                HttpResponse::InternalServerError().json(json!({ "error": "Inference failed" }))
            );
        }
    };

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "result": prediction,
    })))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    page: Option<usize>,
    per_page: Option<usize>,
}

async fn history(
    user: AuthenticatedUser,
    query: web::Query<HistoryQuery>,
    history_service: web::Data<HistoryService>,
) -> HttpResponse {
    let page = query.page.unwrap_or(1);
    let per_page = query.per_page.unwrap_or(DEFAULT_PAGE_SIZE);

    match history_service.list(user.0, page, per_page).await {
        Ok((analyses, pagination)) => {
            let items: Vec<serde_json::Value> =
                analyses.iter().map(|a| a.to_response_json()).collect();
            HttpResponse::Ok().json(json!({
                "status": "success",
                "history": items,
                "pagination": pagination,
            }))
        }
        Err(e) => {
            error!("Failed to list history for user {}: {:?}", user.0, e);
            HttpResponse::InternalServerError().json(json!({ "error": "Failed to fetch history" }))
        }
    }
}

async fn history_detail(
    user: AuthenticatedUser,
    path: web::Path<String>,
    history_service: web::Data<HistoryService>,
) -> HttpResponse {
    let analysis_id = match Uuid::parse_str(&path.into_inner()) {
        Ok(uuid) => uuid,
        Err(_) => {
            return HttpResponse::BadRequest().json(json!({ "error": "Invalid analysis ID format" }))
        }
    };

    match history_service.get(user.0, analysis_id).await {
        Ok(analysis) => HttpResponse::Ok().json(json!({
            "status": "success",
            "analysis": analysis.to_response_json(),
        })),
        Err(HistoryError::NotFound) => HttpResponse::NotFound()
            .json(json!({ "error": "Analysis not found or access denied" })),
        Err(e) => {
            error!("Failed to fetch analysis {}: {:?}", analysis_id, e);
            HttpResponse::InternalServerError().json(json!({ "error": "Failed to fetch analysis" }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::FromRequest;

    #[actix_web::test]
    async fn malformed_multipart_body_is_an_error_not_an_empty_upload() {
        let (req, mut payload) = actix_web::test::TestRequest::default()
            .insert_header(("content-type", "multipart/form-data; boundary=xyz"))
            .set_payload("definitely not a multipart body")
            .to_http_parts();
        let mut multipart = Multipart::from_request(&req, &mut payload).await.unwrap();

        assert!(read_image_field(&mut multipart).await.is_err());
    }

    #[actix_web::test]
    async fn empty_multipart_body_reads_as_no_file() {
        let body = "--xyz--\r\n";
        let (req, mut payload) = actix_web::test::TestRequest::default()
            .insert_header(("content-type", "multipart/form-data; boundary=xyz"))
            .set_payload(body)
            .to_http_parts();
        let mut multipart = Multipart::from_request(&req, &mut payload).await.unwrap();

        assert!(read_image_field(&mut multipart).await.unwrap().is_none());
    }
}
