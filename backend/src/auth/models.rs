use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::password;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub age: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: String, email: String, password: &str, age: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            username,
            email,
            password_hash: password::hash_password(password),
            age,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_password(&mut self, password: &str) {
        self.password_hash = password::hash_password(password);
    }

    pub fn check_password(&self, password: &str) -> bool {
        password::verify_password(password, &self.password_hash)
    }

    /// Representation safe to return to clients; never includes the hash.
    pub fn to_public_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "username": self.username,
            "email": self.email,
            "age": self.age,
            "created_at": self.created_at.to_rfc3339(),
            "updated_at": self.updated_at.to_rfc3339(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // User ID
    pub email: String,
    pub exp: usize,
    pub iat: usize,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub age: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub username: Option<String>,
    pub age: Option<i32>,
    pub password: Option<String>,
}
