use actix_web::{web, HttpResponse, Result};
use serde_json::json;
use uuid::Uuid;

use crate::db::repository::Repository;
use crate::history::service::HistoryService;

use super::jwt::JwtService;
use super::models::{LoginRequest, RegisterRequest, UpdateProfileRequest, User};

const MIN_PASSWORD_LEN: usize = 6;

fn bad_request(message: &str) -> HttpResponse {
    HttpResponse::BadRequest().json(json!({ "error": message }))
}

fn parse_user_id(raw: &str) -> Result<Uuid, HttpResponse> {
    Uuid::parse_str(raw).map_err(|_| bad_request("Invalid user ID format"))
}

pub async fn register(
    payload: web::Json<RegisterRequest>,
    db_repo: web::Data<Repository>,
) -> Result<HttpResponse> {
    let payload = payload.into_inner();

    let (Some(username), Some(email), Some(password), Some(age)) =
        (payload.username, payload.email, payload.password, payload.age)
    else {
        return Ok(bad_request("username, email, password and age are required"));
    };

    let username = username.trim().to_string();
    let email = email.trim().to_lowercase();
    if username.is_empty() || email.is_empty() {
        return Ok(bad_request("username, email, password and age are required"));
    }
    if password.len() < MIN_PASSWORD_LEN {
        return Ok(bad_request("Password must be at least 6 characters long"));
    }

    match db_repo.get_user_by_email(&email).await {
        Ok(Some(_)) => return Ok(bad_request("Email already registered")),
        Ok(None) => {}
        Err(e) => {
            log::error!("Failed to check email uniqueness: {:?}", e);
            return Ok(HttpResponse::InternalServerError()
                .json(json!({ "error": "Registration failed" })));
        }
    }
    match db_repo.get_user_by_username(&username).await {
        Ok(Some(_)) => return Ok(bad_request("Username already taken")),
        Ok(None) => {}
        Err(e) => {
            log::error!("Failed to check username uniqueness: {:?}", e);
            return Ok(HttpResponse::InternalServerError()
                .json(json!({ "error": "Registration failed" })));
        }
    }

    let user = User::new(username, email, &password, age);
    match db_repo.create_user(&user).await {
        Ok(()) => {
            log::info!("Registered new user {} ({})", user.username, user.id);
            Ok(HttpResponse::Created().json(json!({
                "message": "User registered successfully",
                "user": user.to_public_json(),
            })))
        }
        Err(e) => {
            log::error!("Failed to persist user {}: {:?}", user.id, e);
            Ok(HttpResponse::InternalServerError().json(json!({ "error": "Registration failed" })))
        }
    }
}

pub async fn login(
    payload: web::Json<LoginRequest>,
    db_repo: web::Data<Repository>,
    jwt_service: web::Data<JwtService>,
) -> Result<HttpResponse> {
    let payload = payload.into_inner();

    let (Some(email), Some(password)) = (payload.email, payload.password) else {
        return Ok(bad_request("email and password are required"));
    };
    let email = email.trim().to_lowercase();

    let user = match db_repo.get_user_by_email(&email).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return Ok(HttpResponse::Unauthorized()
                .json(json!({ "error": "Invalid email or password" })));
        }
        Err(e) => {
            log::error!("Login lookup failed for {}: {:?}", email, e);
            return Ok(HttpResponse::InternalServerError().json(json!({ "error": "Login failed" })));
        }
    };

    if !user.check_password(&password) {
        log::warn!("Failed login attempt for {}", email);
        return Ok(
            HttpResponse::Unauthorized().json(json!({ "error": "Invalid email or password" }))
        );
    }

    match jwt_service.generate_token(&user) {
        Ok(token) => {
            log::info!("User {} logged in", user.id);
            Ok(HttpResponse::Ok().json(json!({
                "message": "Login successful",
                "access_token": token,
                "user": user.to_public_json(),
            })))
        }
        Err(e) => {
            log::error!("Failed to issue token for {}: {:?}", user.id, e);
            Ok(HttpResponse::InternalServerError().json(json!({ "error": "Login failed" })))
        }
    }
}

pub async fn get_profile(
    path: web::Path<String>,
    db_repo: web::Data<Repository>,
) -> Result<HttpResponse> {
    let user_id = match parse_user_id(&path.into_inner()) {
        Ok(id) => id,
        Err(resp) => return Ok(resp),
    };

    match db_repo.get_user_by_id(user_id).await {
        Ok(Some(user)) => Ok(HttpResponse::Ok().json(json!({
            "status": "success",
            "user": user.to_public_json(),
        }))),
        Ok(None) => Ok(HttpResponse::NotFound().json(json!({ "error": "User not found" }))),
        Err(e) => {
            log::error!("Failed to fetch user {}: {:?}", user_id, e);
            Ok(HttpResponse::InternalServerError()
                .json(json!({ "error": "Failed to fetch profile" })))
        }
    }
}

pub async fn update_profile(
    path: web::Path<String>,
    payload: web::Json<UpdateProfileRequest>,
    db_repo: web::Data<Repository>,
) -> Result<HttpResponse> {
    let user_id = match parse_user_id(&path.into_inner()) {
        Ok(id) => id,
        Err(resp) => return Ok(resp),
    };
    let payload = payload.into_inner();

    let mut user = match db_repo.get_user_by_id(user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return Ok(HttpResponse::NotFound().json(json!({ "error": "User not found" }))),
        Err(e) => {
            log::error!("Failed to fetch user {}: {:?}", user_id, e);
            return Ok(HttpResponse::InternalServerError()
                .json(json!({ "error": "Failed to update profile" })));
        }
    };

    if let Some(username) = payload.username {
        let username = username.trim().to_string();
        if username.is_empty() {
            return Ok(bad_request("username must not be empty"));
        }
        if username != user.username {
            match db_repo.get_user_by_username(&username).await {
                Ok(Some(other)) if other.id != user.id => {
                    return Ok(bad_request("Username already taken"));
                }
                Ok(_) => {}
                Err(e) => {
                    log::error!("Failed to check username uniqueness: {:?}", e);
                    return Ok(HttpResponse::InternalServerError()
                        .json(json!({ "error": "Failed to update profile" })));
                }
            }
            user.username = username;
        }
    }
    if let Some(age) = payload.age {
        user.age = age;
    }
    if let Some(password) = payload.password {
        if password.len() < MIN_PASSWORD_LEN {
            return Ok(bad_request("Password must be at least 6 characters long"));
        }
        user.set_password(&password);
    }
    user.updated_at = chrono::Utc::now();

    match db_repo.update_user(&user).await {
        Ok(()) => Ok(HttpResponse::Ok().json(json!({
            "message": "Profile updated successfully",
            "user": user.to_public_json(),
        }))),
        Err(e) => {
            log::error!("Failed to update user {}: {:?}", user_id, e);
            Ok(HttpResponse::InternalServerError()
                .json(json!({ "error": "Failed to update profile" })))
        }
    }
}

/// Deletes the account and cascades to its analyses and stored images.
pub async fn delete_user(
    path: web::Path<String>,
    db_repo: web::Data<Repository>,
    history: web::Data<HistoryService>,
) -> Result<HttpResponse> {
    let user_id = match parse_user_id(&path.into_inner()) {
        Ok(id) => id,
        Err(resp) => return Ok(resp),
    };

    match db_repo.get_user_by_id(user_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return Ok(HttpResponse::NotFound().json(json!({ "error": "User not found" }))),
        Err(e) => {
            log::error!("Failed to fetch user {}: {:?}", user_id, e);
            return Ok(HttpResponse::InternalServerError()
                .json(json!({ "error": "Failed to delete user" })));
        }
    }

    let purged = match history.purge_user(user_id).await {
        Ok(count) => count,
        Err(e) => {
            log::error!("Failed to purge history for user {}: {:?}", user_id, e);
            return Ok(HttpResponse::InternalServerError()
                .json(json!({ "error": "Failed to delete user" })));
        }
    };

    match db_repo.delete_user(user_id).await {
        Ok(()) => {
            log::info!("Deleted user {} and {} analyses", user_id, purged);
            Ok(HttpResponse::Ok().json(json!({
                "message": "User deleted successfully",
                "analyses_removed": purged,
            })))
        }
        Err(e) => {
            log::error!("Failed to delete user {}: {:?}", user_id, e);
            Ok(HttpResponse::InternalServerError()
                .json(json!({ "error": "Failed to delete user" })))
        }
    }
}

pub async fn list_users(db_repo: web::Data<Repository>) -> Result<HttpResponse> {
    match db_repo.list_users().await {
        Ok(users) => {
            let users: Vec<serde_json::Value> = users.iter().map(User::to_public_json).collect();
            Ok(HttpResponse::Ok().json(json!({
                "status": "success",
                "total": users.len(),
                "users": users,
            })))
        }
        Err(e) => {
            log::error!("Failed to list users: {:?}", e);
            Ok(HttpResponse::InternalServerError().json(json!({ "error": "Failed to list users" })))
        }
    }
}
