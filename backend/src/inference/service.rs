//! Inference over the lazily loaded classifier.
//!
//! One `ModelService` is built at startup and injected wherever predictions
//! are needed. The classifier itself is created on the first predict or
//! warmup call; `OnceLock` guarantees that concurrent first callers trigger
//! exactly one load sequence and then share the cached instance.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use image::DynamicImage;
use shared::{Prediction, CLASS_LABELS};
use tch::{Device, Kind, TchError};

use super::loader::{LoadStrategy, LoadedClassifier, ModelLoader};
use super::preprocess::preprocess;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("model error: {0}")]
    Model(#[from] TchError),
    #[error("model returned {0} scores for a {n}-class classifier", n = CLASS_LABELS.len())]
    UnexpectedOutput(usize),
}

pub struct ModelService {
    loader: ModelLoader,
    device: Device,
    classifier: OnceLock<Mutex<LoadedClassifier>>,
}

impl ModelService {
    pub fn new(artifact: impl Into<PathBuf>) -> Self {
        let device = Device::cuda_if_available();
        Self { loader: ModelLoader::new(artifact, device), device, classifier: OnceLock::new() }
    }

    pub fn artifact(&self) -> &Path {
        self.loader.artifact()
    }

    /// The first caller runs the fallback chain; everyone else blocks until
    /// it finishes and shares the result.
    fn classifier(&self) -> &Mutex<LoadedClassifier> {
        self.classifier.get_or_init(|| Mutex::new(self.loader.load_with_fallback()))
    }

    pub fn is_loaded(&self) -> bool {
        self.classifier.get().is_some()
    }

    /// Strategy of the cached classifier, if one has been loaded yet.
    pub fn load_strategy(&self) -> Option<LoadStrategy> {
        self.classifier.get().map(|m| m.lock().unwrap().strategy)
    }

    /// Forces initialization and reports which strategy produced the
    /// classifier. Used by the warmup probe.
    pub fn warm(&self) -> LoadStrategy {
        self.classifier().lock().unwrap().strategy
    }

    pub fn predict(&self, image: &DynamicImage) -> Result<Prediction, InferenceError> {
        let input = preprocess(image, self.device);

        let guard = self.classifier().lock().unwrap();
        let output = guard.net.forward(&input)?;
        drop(guard);

        let probs = output.softmax(-1, Kind::Float).to_kind(Kind::Float).view(-1);
        let numel = probs.size()[0] as usize;
        if numel != CLASS_LABELS.len() {
            return Err(InferenceError::UnexpectedOutput(numel));
        }
        let mut values = vec![0.0f32; numel];
        probs.copy_data(&mut values, numel);

        let (idx, &confidence) = values
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(Ordering::Equal))
            .unwrap_or((0, &0.0));

        let all_predictions: BTreeMap<String, f32> = CLASS_LABELS
            .iter()
            .zip(&values)
            .map(|(label, &p)| (label.to_string(), p))
            .collect();

        Ok(Prediction {
            predicted_class: CLASS_LABELS[idx].to_string(),
            confidence,
            all_predictions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn test_image() -> DynamicImage {
        DynamicImage::ImageRgb8(image::RgbImage::from_pixel(64, 64, image::Rgb([30, 180, 60])))
    }

    #[test]
    fn predict_returns_a_known_label_and_a_distribution() {
        let service = ModelService::new("/nonexistent/model.ot");
        let prediction = service.predict(&test_image()).unwrap();

        assert!(CLASS_LABELS.contains(&prediction.predicted_class.as_str()));
        assert_eq!(prediction.all_predictions.len(), CLASS_LABELS.len());
        let sum: f32 = prediction.all_predictions.values().sum();
        assert!((sum - 1.0).abs() < 1e-4, "probabilities sum to {sum}");
        assert!((0.0..=1.0).contains(&prediction.confidence));
    }

    #[test]
    fn concurrent_first_use_runs_exactly_one_load_sequence() {
        let service = Arc::new(ModelService::new("/nonexistent/model.ot"));
        assert!(!service.is_loaded());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = Arc::clone(&service);
                std::thread::spawn(move || service.classifier() as *const _ as usize)
            })
            .collect();

        let addrs: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(addrs.windows(2).all(|w| w[0] == w[1]), "all callers share one instance");
        assert_eq!(service.load_strategy(), Some(LoadStrategy::FallbackUntrained));
    }
}
