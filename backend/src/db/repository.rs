use aws_sdk_dynamodb::types::{AttributeValue, Select};
use aws_sdk_dynamodb::Client;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::auth::models::User;
use crate::history::models::Analysis;

#[derive(Clone)]
pub struct Repository {
    client: Client,
    users_table: String,
    analyses_table: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("DynamoDB error: {0}")]
    DynamoDb(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid data format: {0}")]
    InvalidData(String),
}

impl Repository {
    pub fn new(client: Client, users_table: String, analyses_table: String) -> Self {
        Self { client, users_table, analyses_table }
    }

    // User operations

    pub async fn create_user(&self, user: &User) -> Result<(), RepositoryError> {
        log::info!("Creating user in table '{}': {}", self.users_table, user.email);

        let mut item = HashMap::new();
        item.insert("id".to_string(), AttributeValue::S(user.id.to_string()));
        item.insert("username".to_string(), AttributeValue::S(user.username.clone()));
        item.insert("email".to_string(), AttributeValue::S(user.email.clone()));
        item.insert(
            "password_hash".to_string(),
            AttributeValue::S(user.password_hash.clone()),
        );
        item.insert("age".to_string(), AttributeValue::N(user.age.to_string()));
        item.insert(
            "created_at".to_string(),
            AttributeValue::S(user.created_at.to_rfc3339()),
        );
        item.insert(
            "updated_at".to_string(),
            AttributeValue::S(user.updated_at.to_rfc3339()),
        );

        self.client
            .put_item()
            .table_name(&self.users_table)
            .set_item(Some(item))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        Ok(())
    }

    pub async fn get_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, RepositoryError> {
        let mut key = HashMap::new();
        key.insert("id".to_string(), AttributeValue::S(user_id.to_string()));

        let result = self
            .client
            .get_item()
            .table_name(&self.users_table)
            .set_key(Some(key))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        match result.item {
            Some(item) => Ok(Some(parse_user_from_item(item)?)),
            None => Ok(None),
        }
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        self.scan_one_user("email", email).await
    }

    pub async fn get_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<User>, RepositoryError> {
        self.scan_one_user("username", username).await
    }

    async fn scan_one_user(
        &self,
        field: &str,
        value: &str,
    ) -> Result<Option<User>, RepositoryError> {
        let result = self
            .client
            .scan()
            .table_name(&self.users_table)
            .filter_expression("#f = :value")
            .expression_attribute_names("#f", field)
            .expression_attribute_values(":value", AttributeValue::S(value.to_string()))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        if let Some(items) = result.items {
            if let Some(item) = items.into_iter().next() {
                return Ok(Some(parse_user_from_item(item)?));
            }
        }
        Ok(None)
    }

    pub async fn list_users(&self) -> Result<Vec<User>, RepositoryError> {
        let result = self
            .client
            .scan()
            .table_name(&self.users_table)
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        let mut users = Vec::new();
        if let Some(items) = result.items {
            for item in items {
                users.push(parse_user_from_item(item)?);
            }
        }
        Ok(users)
    }

    pub async fn count_users(&self) -> Result<i64, RepositoryError> {
        let result = self
            .client
            .scan()
            .table_name(&self.users_table)
            .select(Select::Count)
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        Ok(result.count() as i64)
    }

    pub async fn update_user(&self, user: &User) -> Result<(), RepositoryError> {
        log::info!("Updating user: {}", user.email);

        let mut key = HashMap::new();
        key.insert("id".to_string(), AttributeValue::S(user.id.to_string()));

        let mut names = HashMap::new();
        names.insert("#username".to_string(), "username".to_string());

        let mut values = HashMap::new();
        values.insert(":username".to_string(), AttributeValue::S(user.username.clone()));
        values.insert(
            ":password_hash".to_string(),
            AttributeValue::S(user.password_hash.clone()),
        );
        values.insert(":age".to_string(), AttributeValue::N(user.age.to_string()));
        values.insert(
            ":updated_at".to_string(),
            AttributeValue::S(user.updated_at.to_rfc3339()),
        );

        self.client
            .update_item()
            .table_name(&self.users_table)
            .set_key(Some(key))
            .update_expression(
                "SET #username = :username, password_hash = :password_hash, age = :age, \
                 updated_at = :updated_at",
            )
            .set_expression_attribute_names(Some(names))
            .set_expression_attribute_values(Some(values))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        Ok(())
    }

    pub async fn delete_user(&self, user_id: Uuid) -> Result<(), RepositoryError> {
        let mut key = HashMap::new();
        key.insert("id".to_string(), AttributeValue::S(user_id.to_string()));

        self.client
            .delete_item()
            .table_name(&self.users_table)
            .set_key(Some(key))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        Ok(())
    }

    // Analysis operations

    pub async fn create_analysis(&self, analysis: &Analysis) -> Result<(), RepositoryError> {
        let mut item = HashMap::new();
        item.insert("id".to_string(), AttributeValue::S(analysis.id.to_string()));
        item.insert(
            "user_id".to_string(),
            AttributeValue::S(analysis.user_id.to_string()),
        );
        item.insert(
            "predicted_class".to_string(),
            AttributeValue::S(analysis.predicted_class.clone()),
        );
        item.insert(
            "confidence".to_string(),
            AttributeValue::N(analysis.confidence.to_string()),
        );
        item.insert(
            "all_predictions".to_string(),
            AttributeValue::S(analysis.all_predictions.to_string()),
        );
        item.insert(
            "image_filename".to_string(),
            AttributeValue::S(analysis.image_filename.clone()),
        );
        item.insert(
            "image_size".to_string(),
            AttributeValue::S(analysis.image_size.clone()),
        );
        item.insert(
            "processing_time".to_string(),
            AttributeValue::N(analysis.processing_time.to_string()),
        );
        item.insert(
            "image_url".to_string(),
            AttributeValue::S(analysis.image_url.clone()),
        );
        item.insert("s3_key".to_string(), AttributeValue::S(analysis.s3_key.clone()));
        item.insert(
            "created_at".to_string(),
            AttributeValue::S(analysis.created_at.to_rfc3339()),
        );

        self.client
            .put_item()
            .table_name(&self.analyses_table)
            .set_item(Some(item))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        Ok(())
    }

    /// Fetches one analysis, scoped to its owner: an id belonging to another
    /// user reads as absent.
    pub async fn get_analysis(
        &self,
        user_id: Uuid,
        analysis_id: Uuid,
    ) -> Result<Option<Analysis>, RepositoryError> {
        let mut key = HashMap::new();
        key.insert("id".to_string(), AttributeValue::S(analysis_id.to_string()));

        let result = self
            .client
            .get_item()
            .table_name(&self.analyses_table)
            .set_key(Some(key))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        match result.item {
            Some(item) => {
                let analysis = parse_analysis_from_item(item)?;
                if analysis.user_id == user_id {
                    Ok(Some(analysis))
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    pub async fn list_analyses(&self, user_id: Uuid) -> Result<Vec<Analysis>, RepositoryError> {
        let result = self
            .client
            .scan()
            .table_name(&self.analyses_table)
            .filter_expression("user_id = :user_id")
            .expression_attribute_values(":user_id", AttributeValue::S(user_id.to_string()))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        let mut analyses = Vec::new();
        if let Some(items) = result.items {
            for item in items {
                analyses.push(parse_analysis_from_item(item)?);
            }
        }
        Ok(analyses)
    }

    pub async fn delete_analysis(&self, analysis_id: Uuid) -> Result<(), RepositoryError> {
        let mut key = HashMap::new();
        key.insert("id".to_string(), AttributeValue::S(analysis_id.to_string()));

        self.client
            .delete_item()
            .table_name(&self.analyses_table)
            .set_key(Some(key))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        Ok(())
    }
}

// Helper parsers for DynamoDB items

fn parse_user_from_item(item: HashMap<String, AttributeValue>) -> Result<User, RepositoryError> {
    let id = item
        .get("id")
        .and_then(|v| v.as_s().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| RepositoryError::InvalidData("Invalid user id".to_string()))?;

    let username = item
        .get("username")
        .and_then(|v| v.as_s().ok())
        .ok_or_else(|| RepositoryError::InvalidData("Invalid username".to_string()))?
        .clone();

    let email = item
        .get("email")
        .and_then(|v| v.as_s().ok())
        .ok_or_else(|| RepositoryError::InvalidData("Invalid email".to_string()))?
        .clone();

    let password_hash = item
        .get("password_hash")
        .and_then(|v| v.as_s().ok())
        .ok_or_else(|| RepositoryError::InvalidData("Invalid password_hash".to_string()))?
        .clone();

    let age = item
        .get("age")
        .and_then(|v| v.as_n().ok())
        .and_then(|s| s.parse::<i32>().ok())
        .ok_or_else(|| RepositoryError::InvalidData("Invalid age".to_string()))?;

    let created_at = parse_timestamp(&item, "created_at")?;
    let updated_at = parse_timestamp(&item, "updated_at").unwrap_or(created_at);

    Ok(User { id, username, email, password_hash, age, created_at, updated_at })
}

fn parse_analysis_from_item(
    item: HashMap<String, AttributeValue>,
) -> Result<Analysis, RepositoryError> {
    let id = item
        .get("id")
        .and_then(|v| v.as_s().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| RepositoryError::InvalidData("Invalid id".to_string()))?;

    let user_id = item
        .get("user_id")
        .and_then(|v| v.as_s().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| RepositoryError::InvalidData("Invalid user_id".to_string()))?;

    let predicted_class = item
        .get("predicted_class")
        .and_then(|v| v.as_s().ok())
        .ok_or_else(|| RepositoryError::InvalidData("Invalid predicted_class".to_string()))?
        .clone();

    let confidence = item
        .get("confidence")
        .and_then(|v| v.as_n().ok())
        .and_then(|s| s.parse::<f32>().ok())
        .ok_or_else(|| RepositoryError::InvalidData("Invalid confidence".to_string()))?;

    let all_predictions = item
        .get("all_predictions")
        .and_then(|v| v.as_s().ok())
        .and_then(|s| serde_json::from_str(s).ok())
        .ok_or_else(|| RepositoryError::InvalidData("Invalid all_predictions".to_string()))?;

    let image_filename = item
        .get("image_filename")
        .and_then(|v| v.as_s().ok())
        .ok_or_else(|| RepositoryError::InvalidData("Invalid image_filename".to_string()))?
        .clone();

    let image_size = item
        .get("image_size")
        .and_then(|v| v.as_s().ok())
        .ok_or_else(|| RepositoryError::InvalidData("Invalid image_size".to_string()))?
        .clone();

    let processing_time = item
        .get("processing_time")
        .and_then(|v| v.as_n().ok())
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| RepositoryError::InvalidData("Invalid processing_time".to_string()))?;

    let image_url = item
        .get("image_url")
        .and_then(|v| v.as_s().ok())
        .ok_or_else(|| RepositoryError::InvalidData("Invalid image_url".to_string()))?
        .clone();

    let s3_key = item
        .get("s3_key")
        .and_then(|v| v.as_s().ok())
        .ok_or_else(|| RepositoryError::InvalidData("Invalid s3_key".to_string()))?
        .clone();

    let created_at = parse_timestamp(&item, "created_at")?;

    Ok(Analysis {
        id,
        user_id,
        predicted_class,
        confidence,
        all_predictions,
        image_filename,
        image_size,
        processing_time,
        image_url,
        s3_key,
        created_at,
    })
}

fn parse_timestamp(
    item: &HashMap<String, AttributeValue>,
    field: &str,
) -> Result<DateTime<Utc>, RepositoryError> {
    item.get(field)
        .and_then(|v| v.as_s().ok())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| RepositoryError::InvalidData(format!("Invalid {field}")))
}
