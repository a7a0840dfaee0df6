use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use shared::Prediction;
use uuid::Uuid;

/// One persisted prediction. Written exactly once after a successful
/// upload + inference pair, never mutated, removed only when the owning
/// user is deleted.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub id: Uuid,
    pub user_id: Uuid,
    pub predicted_class: String,
    pub confidence: f32,
    pub all_predictions: serde_json::Value,
    pub image_filename: String,
    pub image_size: String,
    pub processing_time: f64,
    pub image_url: String,
    pub s3_key: String,
    pub created_at: DateTime<Utc>,
}

impl Analysis {
    pub fn new(
        user_id: Uuid,
        prediction: &Prediction,
        image_filename: String,
        image_size: String,
        processing_time: f64,
        image_url: String,
        s3_key: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            predicted_class: prediction.predicted_class.clone(),
            confidence: prediction.confidence,
            all_predictions: json!(prediction.all_predictions),
            image_filename,
            image_size,
            processing_time,
            image_url,
            s3_key,
            created_at: Utc::now(),
        }
    }

    pub fn to_response_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "user_id": self.user_id,
            "predicted_class": self.predicted_class,
            "confidence": self.confidence,
            "all_predictions": self.all_predictions,
            "image_info": {
                "filename": self.image_filename,
                "size": self.image_size,
                "processing_time": self.processing_time,
            },
            "images": {
                "original_image_url": self.image_url,
            },
            "created_at": self.created_at.to_rfc3339(),
        })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Pagination {
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
    pub pages: usize,
    pub has_next: bool,
    pub has_prev: bool,
}
