//! Infer stage.
//!
//! The pipeline only depends on [`Classifier`]: a normalized image goes in, a
//! score per condition comes out, and the scores sum to 1. The built-in
//! [`HeuristicClassifier`] stands in for a trained model; [`RemoteClassifier`]
//! forwards the image to an external model server.

use async_trait::async_trait;
use image::ImageFormat;
use reqwest::{multipart, Client};
use serde::Deserialize;
use std::io::Cursor;
use std::str::FromStr;
use strsim::jaro_winkler;
use strum::IntoEnumIterator;

use crate::models::analysis::{CategoryScore, Condition};
use crate::services::preprocess::NormalizedImage;

/// Tolerance when checking that a score list sums to 1.
pub const SCORE_SUM_TOLERANCE: f64 = 1e-6;

/// Minimum similarity for mapping a free-form model label onto the vocabulary.
const LABEL_MATCH_THRESHOLD: f64 = 0.85;

#[async_trait]
pub trait Classifier: Send + Sync {
    /// Identifier recorded in the result's version string.
    fn model_version(&self) -> &str;

    async fn classify(&self, image: &NormalizedImage) -> Result<Vec<CategoryScore>, InferenceError>;
}

/// Check the Infer stage contract: every score in [0, 1] and the total is 1.
pub fn validate_scores(scores: &[CategoryScore]) -> Result<(), InferenceError> {
    if scores.is_empty() {
        return Err(InferenceError::InvalidScores("no categories returned".to_string()));
    }
    if let Some(bad) = scores.iter().find(|s| !(0.0..=1.0).contains(&s.score)) {
        return Err(InferenceError::InvalidScores(format!(
            "score {} for {} outside [0, 1]",
            bad.score, bad.condition
        )));
    }
    let total: f64 = scores.iter().map(|s| s.score).sum();
    if (total - 1.0).abs() > SCORE_SUM_TOLERANCE {
        return Err(InferenceError::InvalidScores(format!(
            "scores sum to {total:.6}"
        )));
    }
    Ok(())
}

fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Deterministic classifier driven by colour and texture statistics.
#[derive(Debug, Default, Clone)]
pub struct HeuristicClassifier;

impl HeuristicClassifier {
    pub const VERSION: &'static str = "heuristic-v1";

    fn logit(condition: Condition, f: &Features) -> f64 {
        match condition {
            Condition::Healthy => 2.0 + 4.0 * f.contrast - 3.0 * f.redness.abs(),
            Condition::PinkEye => 8.0 * f.redness,
            Condition::Cataract => 5.0 * (f.brightness - 0.6) + 3.0 * (1.0 - f.sharpness),
            Condition::Glaucoma => 3.0 * (0.35 - f.brightness),
            Condition::Pterygium => 4.0 * (f.yellowness - 0.15),
            Condition::Uveitis => 5.0 * (f.redness - 0.3) + 2.0 * (0.4 - f.brightness),
            Condition::Stye => 3.0 * (f.redness - 0.2) + 2.0 * (f.contrast - 0.5),
            Condition::Trachoma => 2.0 * (f.sharpness - 0.8) - 1.0,
            Condition::Keratoconus | Condition::Strabismus => -1.0,
        }
    }
}

/// Image statistics in [0, 1] (redness may be negative).
struct Features {
    brightness: f64,
    contrast: f64,
    sharpness: f64,
    redness: f64,
    yellowness: f64,
}

impl Features {
    fn extract(image: &NormalizedImage) -> Self {
        let [r, g, b] = image.channel_means();
        let luma = image.luma();
        let brightness = if luma.is_empty() {
            0.0
        } else {
            luma.iter().sum::<f64>() / luma.len() as f64
        };

        Self {
            brightness,
            contrast: (image.contrast() / 0.25).min(1.0),
            sharpness: (image.sharpness() / 0.1).min(1.0),
            redness: r - (g + b) / 2.0,
            yellowness: ((r + g) / 2.0 - b).max(0.0),
        }
    }
}

#[async_trait]
impl Classifier for HeuristicClassifier {
    fn model_version(&self) -> &str {
        Self::VERSION
    }

    async fn classify(&self, image: &NormalizedImage) -> Result<Vec<CategoryScore>, InferenceError> {
        let features = Features::extract(image);
        let conditions: Vec<Condition> = Condition::iter().collect();
        let logits: Vec<f64> = conditions
            .iter()
            .map(|c| Self::logit(*c, &features))
            .collect();

        Ok(conditions
            .into_iter()
            .zip(softmax(&logits))
            .map(|(condition, score)| CategoryScore { condition, score })
            .collect())
    }
}

/// Map a model label ("Pink Eye", "pink-eye", "cataracts") onto the vocabulary.
pub fn normalize_label(label: &str) -> Option<Condition> {
    let cleaned = label.trim().to_lowercase().replace([' ', '-'], "_");
    if let Ok(condition) = Condition::from_str(&cleaned) {
        return Some(condition);
    }

    Condition::iter()
        .map(|c| (c, jaro_winkler(&cleaned, c.into())))
        .filter(|(_, score)| *score >= LABEL_MATCH_THRESHOLD)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(c, _)| c)
}

/// Spread a single prediction into a full distribution. The predicted label
/// keeps `confidence` (at least a uniform share); the rest is split evenly.
pub fn distribution_for(predicted: Condition, confidence: Option<f64>) -> Vec<CategoryScore> {
    let n = Condition::iter().count() as f64;
    let top = confidence.unwrap_or(1.0).clamp(1.0 / n, 1.0);
    let rest = (1.0 - top) / (n - 1.0);

    Condition::iter()
        .map(|condition| CategoryScore {
            condition,
            score: if condition == predicted { top } else { rest },
        })
        .collect()
}

/// Response shapes served by the model backend's `/predict/` endpoint.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PredictResponse {
    Detailed { prediction: DetailedPrediction },
    Simple { predicted_class_label: String },
}

#[derive(Debug, Deserialize)]
struct DetailedPrediction {
    #[serde(rename = "className")]
    class_name: String,
    confidence: Option<f64>,
}

/// Client for an external classification server.
pub struct RemoteClassifier {
    http: Client,
    endpoint: String,
    version: String,
}

impl RemoteClassifier {
    pub fn new(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            http: Client::new(),
            endpoint: format!("{}/predict/", base),
            version: format!("remote:{}", base),
        }
    }
}

#[async_trait]
impl Classifier for RemoteClassifier {
    fn model_version(&self) -> &str {
        &self.version
    }

    async fn classify(&self, image: &NormalizedImage) -> Result<Vec<CategoryScore>, InferenceError> {
        let mut png = Cursor::new(Vec::new());
        image.pixels().write_to(&mut png, ImageFormat::Png)?;

        let form = multipart::Form::new().part(
            "file",
            multipart::Part::bytes(png.into_inner())
                .file_name("scan.png")
                .mime_str("image/png")?,
        );

        let response = self
            .http
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Remote {
                status: status.as_u16(),
                body,
            });
        }

        let (label, confidence) = match response.json::<PredictResponse>().await? {
            PredictResponse::Detailed { prediction } => (prediction.class_name, prediction.confidence),
            PredictResponse::Simple {
                predicted_class_label,
            } => (predicted_class_label, None),
        };

        let condition =
            normalize_label(&label).ok_or_else(|| InferenceError::UnknownLabel(label.clone()))?;

        tracing::debug!(label = %label, condition = %condition, ?confidence, "Remote classification");

        Ok(distribution_for(condition, confidence))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Classifier request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Classifier returned status {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("Failed to encode image for classifier: {0}")]
    Encode(#[from] image::ImageError),

    #[error("Classifier returned unknown label '{0}'")]
    UnknownLabel(String),

    #[error("Classifier returned invalid scores: {0}")]
    InvalidScores(String),
}
