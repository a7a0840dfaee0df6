use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The fixed set of classes the sunflower leaf classifier was trained on.
pub const CLASS_LABELS: [&str; 4] = ["DownyMildew", "Fresh Leaf", "GrayMold", "Leaf scars"];

/// Side length of the square model input, matching the training pipeline.
pub const IMG_SIZE: u32 = 512;

#[derive(Serialize, Deserialize, Clone)]
pub struct Base64ImageRequest {
    /// Data URL, e.g. "data:image/jpeg;base64,...".
    pub image: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Prediction {
    pub predicted_class: String,
    pub confidence: f32,
    pub all_predictions: BTreeMap<String, f32>,
}
